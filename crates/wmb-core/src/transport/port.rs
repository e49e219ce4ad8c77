use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{domain::Jid, transport::types::TransportEvent, Result};

/// Outbound image attachment.
#[derive(Clone, Debug)]
pub struct OutgoingImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub caption: String,
    pub mimetype: String,
}

/// Outbound half of a transport session. Shareable: spawned pipeline runs and
/// the daily trigger hold clones while the session lives.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, chat: &Jid, text: &str) -> Result<()>;
    async fn send_image(&self, chat: &Jid, image: OutgoingImage) -> Result<()>;
}

/// One live connection: an ordered event stream plus a sender.
pub struct TransportSession {
    pub events: mpsc::Receiver<TransportEvent>,
    pub sender: Arc<dyn MessageSender>,
}

/// Connect port implemented by transport adapter crates. The supervisor calls
/// this once per connection attempt and owns the resulting session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportSession>;
}
