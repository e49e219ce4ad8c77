use std::fmt;

use crate::domain::Jid;

/// Close status reported by the messaging transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// The distinguished "logged out" status (Baileys `DisconnectReason.loggedOut`).
    /// Terminal: stored credentials are invalid and reconnecting is pointless.
    pub const LOGGED_OUT: CloseCode = CloseCode(401);

    /// Used when the bridge socket drops without delivering a close frame.
    pub const STREAM_ENDED: CloseCode = CloseCode(1006);

    pub fn is_logged_out(self) -> bool {
        self == Self::LOGGED_OUT
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound chat message, already normalized by the transport adapter.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat: Jid,
    pub sender: Jid,
    pub text: String,
    pub mentions: Vec<Jid>,
    pub from_me: bool,
}

/// Events one transport session delivers, in order, one at a time.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Session is open; `self_jid` is the bot's own address, used to detect
    /// @-mentions.
    Opened { self_jid: Jid },
    Closed { code: CloseCode },
    Message(InboundMessage),
    /// Updated credential snapshot to persist for the next connection attempt.
    CredentialsUpdate { snapshot: serde_json::Value },
    /// First-time pairing code to show the operator.
    Pairing { qr: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_401_is_terminal() {
        assert!(CloseCode::LOGGED_OUT.is_logged_out());
        assert!(!CloseCode::STREAM_ENDED.is_logged_out());
        assert!(!CloseCode(408).is_logged_out());
        assert!(!CloseCode(428).is_logged_out());
    }
}
