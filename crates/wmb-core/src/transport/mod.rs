//! Messaging transport abstractions (WhatsApp bridge today).

pub mod port;
pub mod types;
