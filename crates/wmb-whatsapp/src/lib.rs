//! WhatsApp adapter (tokio-tungstenite).
//!
//! This crate implements the `wmb-core` Transport port over a WebSocket
//! bridge speaking a Baileys-style JSON frame protocol: one JSON object per
//! text frame, tagged by `type`. Binary image payloads travel base64-encoded
//! inside the `image` frame.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use wmb_core::{
    domain::Jid,
    errors::Error,
    transport::{
        port::{MessageSender, OutgoingImage, Transport, TransportSession},
        types::{CloseCode, InboundMessage, TransportEvent},
    },
    Result,
};

/// Frames the bridge sends us.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Open {
        jid: String,
    },
    Close {
        code: u16,
    },
    Message {
        chat: String,
        sender: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        mentions: Vec<String>,
        #[serde(default)]
        from_me: bool,
    },
    Creds {
        snapshot: serde_json::Value,
    },
    Qr {
        qr: String,
    },
}

/// Frames we send to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Auth {
        snapshot: serde_json::Value,
    },
    Text {
        chat: String,
        text: String,
    },
    Image {
        chat: String,
        data: String,
        filename: String,
        caption: String,
        mimetype: String,
    },
}

impl From<BridgeFrame> for TransportEvent {
    fn from(frame: BridgeFrame) -> Self {
        match frame {
            BridgeFrame::Open { jid } => TransportEvent::Opened {
                self_jid: Jid::new(jid),
            },
            BridgeFrame::Close { code } => TransportEvent::Closed {
                code: CloseCode(code),
            },
            BridgeFrame::Message {
                chat,
                sender,
                text,
                mentions,
                from_me,
            } => TransportEvent::Message(InboundMessage {
                chat: Jid::new(chat),
                sender: Jid::new(sender),
                text,
                mentions: mentions.into_iter().map(Jid::new).collect(),
                from_me,
            }),
            BridgeFrame::Creds { snapshot } => TransportEvent::CredentialsUpdate { snapshot },
            BridgeFrame::Qr { qr } => TransportEvent::Pairing { qr },
        }
    }
}

pub struct WhatsAppGateway {
    url: String,
    auth_state_file: PathBuf,
}

impl WhatsAppGateway {
    pub fn new(url: impl Into<String>, auth_state_file: PathBuf) -> Self {
        Self {
            url: url.into(),
            auth_state_file,
        }
    }

    fn map_err(e: tokio_tungstenite::tungstenite::Error) -> Error {
        Error::Transport(format!("websocket error: {e}"))
    }

    /// Stored credential snapshot from a previous session, if any. A missing
    /// or unreadable file means first-time pairing; the bridge answers with a
    /// `qr` frame instead of `open`.
    async fn stored_snapshot(&self) -> Option<serde_json::Value> {
        let bytes = tokio::fs::read(&self.auth_state_file).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                eprintln!(
                    "[CONN] ignoring unreadable credential snapshot {}: {e}",
                    self.auth_state_file.display()
                );
                None
            }
        }
    }
}

#[async_trait]
impl Transport for WhatsAppGateway {
    async fn connect(&self) -> Result<TransportSession> {
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(Self::map_err)?;
        let (mut write, mut read) = socket.split();

        if let Some(snapshot) = self.stored_snapshot().await {
            let auth = serde_json::to_string(&ClientFrame::Auth { snapshot })?;
            write.send(Message::Text(auth)).await.map_err(Self::map_err)?;
        }

        // Writer task: one queue, so text and image sends share frame order.
        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(64);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        eprintln!("[CONN] failed to encode outgoing frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    eprintln!("[CONN] websocket send failed: {e}");
                    break;
                }
            }
        });

        // Reader task: JSON frames become port events. A socket drop without
        // a close frame surfaces as the recoverable stream-ended code so the
        // supervisor always observes a close.
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
        tokio::spawn(async move {
            let mut closed = false;
            while let Some(next) = read.next().await {
                let message = match next {
                    Ok(m) => m,
                    Err(e) => {
                        eprintln!("[CONN] websocket receive failed: {e}");
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    // Pings are answered by the protocol layer.
                    _ => continue,
                };
                let frame: BridgeFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        eprintln!("[CONN] dropping malformed frame: {e}");
                        continue;
                    }
                };
                closed = matches!(frame, BridgeFrame::Close { .. });
                if event_tx.send(frame.into()).await.is_err() {
                    return; // session consumer is gone
                }
                if closed {
                    break;
                }
            }
            if !closed {
                let _ = event_tx
                    .send(TransportEvent::Closed {
                        code: CloseCode::STREAM_ENDED,
                    })
                    .await;
            }
        });

        Ok(TransportSession {
            events: event_rx,
            sender: Arc::new(GatewaySender { out: out_tx }),
        })
    }
}

/// Sender half handed to the supervisor; outlives neither the writer task
/// nor the socket, so a send after disconnect fails fast.
struct GatewaySender {
    out: mpsc::Sender<ClientFrame>,
}

impl GatewaySender {
    async fn queue(&self, frame: ClientFrame) -> Result<()> {
        self.out
            .send(frame)
            .await
            .map_err(|_| Error::Transport("gateway connection is closed".to_string()))
    }
}

#[async_trait]
impl MessageSender for GatewaySender {
    async fn send_text(&self, chat: &Jid, text: &str) -> Result<()> {
        self.queue(ClientFrame::Text {
            chat: chat.as_str().to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_image(&self, chat: &Jid, image: OutgoingImage) -> Result<()> {
        self.queue(ClientFrame::Image {
            chat: chat.as_str().to_string(),
            data: BASE64.encode(&image.bytes),
            filename: image.filename,
            caption: image.caption,
            mimetype: image.mimetype,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_frame_becomes_opened_event() {
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"open","jid":"628999:3@s.whatsapp.net"}"#).unwrap();
        let event: TransportEvent = frame.into();
        match event {
            TransportEvent::Opened { self_jid } => {
                assert_eq!(self_jid.as_str(), "628999:3@s.whatsapp.net");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn close_frame_carries_the_status_code() {
        let frame: BridgeFrame = serde_json::from_str(r#"{"type":"close","code":401}"#).unwrap();
        match TransportEvent::from(frame) {
            TransportEvent::Closed { code } => assert!(code.is_logged_out()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_frame_defaults_optional_fields() {
        let frame: BridgeFrame = serde_json::from_str(
            r#"{"type":"message","chat":"g@g.us","sender":"u@s.whatsapp.net"}"#,
        )
        .unwrap();
        match TransportEvent::from(frame) {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.text, "");
                assert!(msg.mentions.is_empty());
                assert!(!msg.from_me);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_frame_maps_mentions() {
        let frame: BridgeFrame = serde_json::from_str(
            r#"{"type":"message","chat":"g@g.us","sender":"u@s.whatsapp.net","text":"@628999 monitoring","mentions":["628999@s.whatsapp.net"],"from_me":false}"#,
        )
        .unwrap();
        match TransportEvent::from(frame) {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.mentions, vec![Jid::new("628999@s.whatsapp.net")]);
                assert_eq!(msg.text, "@628999 monitoring");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn image_frame_encodes_bytes_as_base64() {
        let frame = ClientFrame::Image {
            chat: "g@g.us".to_string(),
            data: BASE64.encode([0x89, 0x50, 0x4e, 0x47]),
            filename: "report.png".to_string(),
            caption: "report".to_string(),
            mimetype: "image/png".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["data"], "iVBORw==");
        assert_eq!(json["mimetype"], "image/png");
    }

    #[test]
    fn auth_frame_wraps_the_snapshot() {
        let frame = ClientFrame::Auth {
            snapshot: serde_json::json!({"registered": true}),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "auth");
        assert_eq!(json["snapshot"]["registered"], true);
    }
}
