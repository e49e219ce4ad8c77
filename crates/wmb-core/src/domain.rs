use std::{fmt, path::PathBuf};

use crate::{errors::Error, Result};

/// WhatsApp address of a user or chat (e.g. `628123456789@s.whatsapp.net`,
/// `1234567890-123@g.us`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group chats live on the `g.us` server.
    pub fn is_group(&self) -> bool {
        self.0.ends_with("@g.us")
    }

    /// User part without the device suffix or server, for mention comparison:
    /// `628123:12@s.whatsapp.net` → `628123`.
    pub fn bare(&self) -> &str {
        let user = self.0.split('@').next().unwrap_or("");
        user.split(':').next().unwrap_or("")
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messaging session lifecycle. `LoggedOut` is terminal: the stored transport
/// credentials are no longer valid and the operator must pair again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    LoggedOut,
}

/// Output of one report pipeline run. The PNG bytes are carried in memory so
/// delivery never re-reads a file a concurrent run may have rewritten; the
/// files on disk are the audit trail.
#[derive(Clone, Debug)]
pub struct ReportArtifact {
    pub csv_path: PathBuf,
    pub image_path: PathBuf,
    /// Filename stem shared by the CSV and PNG, e.g. `05 March Error Monitoring WhaTap`.
    pub filename: String,
    pub caption: String,
    pub png: Vec<u8>,
}

/// Who may do what, resolved once from config and read-only per message.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationContext {
    /// Senders allowed to run `!setpassword`.
    pub authorized_users: Vec<Jid>,
    /// Chats the bot listens to. Empty means all chats are allowed.
    pub whitelist: Vec<Jid>,
}

impl AuthorizationContext {
    /// Password changes are limited to the configured sender set. The error
    /// carries the offending address for the server log; the chat-facing
    /// wording stays with the handler.
    pub fn ensure_may_set_password(&self, sender: &Jid) -> Result<()> {
        if self.authorized_users.contains(sender) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{sender} may not change the password"
            )))
        }
    }

    pub fn chat_allowed(&self, chat: &Jid) -> bool {
        self.whitelist.is_empty() || self.whitelist.contains(chat)
    }
}
