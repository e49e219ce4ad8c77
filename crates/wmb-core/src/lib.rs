//! Core domain + application logic for the WhatsApp monitoring bot.
//!
//! This crate is intentionally framework-agnostic. The WhatsApp gateway and the
//! headless-browser renderer live behind ports (traits) implemented in adapter
//! crates.

pub mod command;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod records;
pub mod render;
pub mod report;
pub mod supervisor;
pub mod table;
pub mod transport;
pub mod whatap;
pub mod window;

pub use errors::{Error, Result};
