//! Per-connection message handler: gates, intent dispatch, and user-facing
//! replies. Pipeline errors never reach the chat as raw text; users get one
//! generic failure message and the cause goes to the server log.

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::task::JoinHandle;

use crate::{
    command::{self, Command, DateFormat, Parsed},
    config::CredentialStore,
    domain::{AuthorizationContext, Jid},
    errors::Error,
    report::ReportGenerator,
    transport::{
        port::{MessageSender, OutgoingImage},
        types::InboundMessage,
    },
    window::ReportWindow,
};

const REPORT_FAILURE: &str = "❌ Failed to generate report. Check server logs.";

pub struct MessageHandler {
    auth: AuthorizationContext,
    date_format: DateFormat,
    tz_offset: FixedOffset,
    self_jid: Jid,
    creds: Arc<CredentialStore>,
    generator: Arc<dyn ReportGenerator>,
    sender: Arc<dyn MessageSender>,
}

impl MessageHandler {
    pub fn new(
        auth: AuthorizationContext,
        date_format: DateFormat,
        tz_offset: FixedOffset,
        self_jid: Jid,
        creds: Arc<CredentialStore>,
        generator: Arc<dyn ReportGenerator>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            auth,
            date_format,
            tz_offset,
            self_jid,
            creds,
            generator,
            sender,
        }
    }

    /// Handle one inbound message to completion. Report generation is spawned
    /// so the event loop stays responsive; the returned handle is detached by
    /// the supervisor and awaited only by tests.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<JoinHandle<()>> {
        if msg.from_me {
            return None;
        }
        if !self.auth.chat_allowed(&msg.chat) {
            return None;
        }
        // In a group the bot only answers when explicitly mentioned; in a
        // one-to-one chat no mention is needed.
        if msg.chat.is_group() && !self.is_mentioned(msg) {
            return None;
        }

        let text = command::scrub_mentions(&msg.text);
        match command::parse(&text, self.date_format) {
            Parsed::Ignored => None,
            Parsed::Invalid(reply) => {
                self.send(&msg.chat, &reply).await;
                None
            }
            Parsed::Command(Command::Help) => {
                self.send(&msg.chat, &command::help_text(self.date_format)).await;
                None
            }
            Parsed::Command(Command::SetPassword(value)) => {
                let reply = self.set_password(&msg.sender, &value).await;
                self.send(&msg.chat, &reply).await;
                None
            }
            Parsed::Command(Command::Report(range)) => self.dispatch_report(msg, range).await,
        }
    }

    fn is_mentioned(&self, msg: &InboundMessage) -> bool {
        msg.mentions.iter().any(|m| m.bare() == self.self_jid.bare())
    }

    async fn set_password(&self, sender: &Jid, value: &str) -> String {
        if let Err(e) = self.auth.ensure_may_set_password(sender) {
            eprintln!("[BOT] {e}");
            return "You are not authorized to change the password.".to_string();
        }
        if value.trim().is_empty() {
            return "Please provide a new password.".to_string();
        }
        match self.creds.update(value).await {
            Ok(()) => {
                println!("[BOT] APP_PASSWORD updated by {sender}");
                "🎉 APP_PASSWORD has been updated successfully.".to_string()
            }
            Err(e) => {
                eprintln!("[BOT] failed to update APP_PASSWORD: {e}");
                "❌ Failed to update APP_PASSWORD. Check server logs.".to_string()
            }
        }
    }

    async fn dispatch_report(
        &self,
        msg: &InboundMessage,
        range: Option<(chrono::NaiveDate, chrono::NaiveDate)>,
    ) -> Option<JoinHandle<()>> {
        let (window, ack) = match range {
            Some((start, end)) => {
                let window = match ReportWindow::explicit(start, end, self.tz_offset) {
                    Ok(w) => w,
                    Err(Error::Validation(reply)) => {
                        self.send(&msg.chat, &reply).await;
                        return None;
                    }
                    Err(e) => {
                        eprintln!("[BOT] failed to build report window: {e}");
                        self.send(&msg.chat, REPORT_FAILURE).await;
                        return None;
                    }
                };
                let ack = format!(
                    "Alright, preparing your report from {} to {}. This may take a few seconds...",
                    start.format("%d %b %Y"),
                    end.format("%d %b %Y"),
                );
                (Some(window), ack)
            }
            None => (
                None,
                "Alright, preparing today's daily report. This may take a few seconds..."
                    .to_string(),
            ),
        };

        // The acknowledgement always lands before the image.
        self.send(&msg.chat, &ack).await;

        let generator = self.generator.clone();
        let sender = self.sender.clone();
        let chat = msg.chat.clone();
        Some(tokio::spawn(async move {
            match generator.generate(window).await {
                Ok(artifact) => {
                    let image = OutgoingImage {
                        bytes: artifact.png,
                        filename: format!("{}.png", artifact.filename),
                        caption: artifact.caption,
                        mimetype: "image/png".to_string(),
                    };
                    if let Err(e) = sender.send_image(&chat, image).await {
                        eprintln!("[BOT] failed to send report image: {e}");
                    }
                }
                Err(e) => {
                    eprintln!("[BOT] failed to generate report: {e}");
                    if let Err(send_e) = sender.send_text(&chat, REPORT_FAILURE).await {
                        eprintln!("[BOT] failed to send failure message: {send_e}");
                    }
                }
            }
        }))
    }

    async fn send(&self, chat: &Jid, text: &str) {
        if let Err(e) = self.sender.send_text(chat, text).await {
            eprintln!("[BOT] failed to send message: {e}");
        }
    }
}
