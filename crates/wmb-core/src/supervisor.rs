//! Connection supervisor: owns the transport session, drives the reconnect
//! state machine as a loop (never recursion), and arms the daily report
//! trigger exactly once per process.
//!
//! Transport errors are translated into state transitions and logged; they
//! never propagate to chat users. The loop exits only on the terminal
//! logged-out state.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, CredentialStore},
    domain::{ConnectionState, Jid},
    handler::MessageHandler,
    report::ReportGenerator,
    transport::{
        port::{MessageSender, OutgoingImage, Transport, TransportSession},
        types::TransportEvent,
    },
    Result,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const TRIGGER_HOUR: u32 = 8;
const TRIGGER_MINUTE: u32 = 31;

/// The armed daily trigger. Arena-of-one ownership: `Option<TriggerHandle>`
/// held by the supervisor replaces any ambient "already scheduled" flag.
struct TriggerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    cfg: Arc<Config>,
    transport: Arc<dyn Transport>,
    generator: Arc<dyn ReportGenerator>,
    creds: Arc<CredentialStore>,
    state: watch::Sender<ConnectionState>,
    /// Sender of the live session, swapped on every (re)connect so the
    /// long-lived trigger task always delivers through the current session.
    current_sender: Arc<RwLock<Option<Arc<dyn MessageSender>>>>,
    trigger: Mutex<Option<TriggerHandle>>,
    times_armed: AtomicUsize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

enum SessionEnd {
    LoggedOut,
    Recoverable { opened: bool },
}

impl Supervisor {
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn Transport>,
        generator: Arc<dyn ReportGenerator>,
        creds: Arc<CredentialStore>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            cfg,
            transport,
            generator,
            creds,
            state,
            current_sender: Arc::new(RwLock::new(None)),
            trigger: Mutex::new(None),
            times_armed: AtomicUsize::new(0),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn trigger_armed(&self) -> bool {
        self.trigger.lock().await.is_some()
    }

    pub fn times_armed(&self) -> usize {
        self.times_armed.load(Ordering::SeqCst)
    }

    /// Run until the server logs the bot out. Connect failures and
    /// recoverable closes restart the loop with bounded backoff; the backoff
    /// resets after every session that actually opened.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = self.initial_backoff;
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            let session = match self.transport.connect().await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("[CONN] connect failed: {e}");
                    self.state.send_replace(ConnectionState::Disconnected);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                    continue;
                }
            };

            *self.current_sender.write().await = Some(session.sender.clone());
            let end = self.drive_session(session).await;
            *self.current_sender.write().await = None;

            match end {
                SessionEnd::LoggedOut => {
                    self.state.send_replace(ConnectionState::LoggedOut);
                    self.disarm_trigger().await;
                    eprintln!(
                        "[CONN] logged out by the server; delete {} and pair again",
                        self.cfg.auth_state_file.display()
                    );
                    return Ok(());
                }
                SessionEnd::Recoverable { opened } => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    if opened {
                        backoff = self.initial_backoff;
                    }
                    println!("[CONN] reconnecting in {}s", backoff.as_secs());
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }

    /// Process one session's events to completion, one at a time. Pipeline
    /// runs spawned by the handler may overlap; message handling does not.
    async fn drive_session(&self, mut session: TransportSession) -> SessionEnd {
        let mut opened = false;
        let mut handler: Option<MessageHandler> = None;

        while let Some(event) = session.events.recv().await {
            match event {
                TransportEvent::Pairing { qr } => {
                    println!("[CONN] pair this device by scanning:\n{qr}");
                }
                TransportEvent::Opened { self_jid } => {
                    opened = true;
                    self.state.send_replace(ConnectionState::Connected);
                    println!("[CONN] connected as {self_jid}");
                    handler = Some(MessageHandler::new(
                        self.cfg.authorization(),
                        self.cfg.date_format,
                        self.cfg.tz_offset,
                        self_jid,
                        self.creds.clone(),
                        self.generator.clone(),
                        session.sender.clone(),
                    ));
                    if self.cfg.report_group.is_some() {
                        self.arm_trigger().await;
                    } else {
                        println!(
                            "[CONN] WHATSAPP_GROUP_JID not set; inbound group chats will be logged so the destination can be configured"
                        );
                    }
                }
                TransportEvent::Closed { code } => {
                    if code.is_logged_out() {
                        return SessionEnd::LoggedOut;
                    }
                    eprintln!("[CONN] connection closed ({code})");
                    return SessionEnd::Recoverable { opened };
                }
                TransportEvent::Message(msg) => {
                    if self.cfg.report_group.is_none() && msg.chat.is_group() {
                        println!("[CONN] group chat {}: {}", msg.chat, msg.text);
                    }
                    if let Some(handler) = &handler {
                        // The returned pipeline task is deliberately detached.
                        let _ = handler.handle(&msg).await;
                    }
                }
                TransportEvent::CredentialsUpdate { snapshot } => {
                    self.persist_credentials(&snapshot).await;
                }
            }
        }

        // Event stream ended without a close frame; treat as a recoverable drop.
        SessionEnd::Recoverable { opened }
    }

    /// Arm the daily trigger if it is not armed yet. Repeat `Opened` events
    /// after a brief reconnect find the handle present and do nothing.
    async fn arm_trigger(&self) {
        let Some(group) = self.cfg.report_group.clone() else {
            return;
        };
        let mut guard = self.trigger.lock().await;
        if guard.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(trigger_loop(
            self.cfg.clone(),
            self.generator.clone(),
            self.state.subscribe(),
            self.current_sender.clone(),
            group,
            cancel.clone(),
        ));
        *guard = Some(TriggerHandle { cancel, task });
        self.times_armed.fetch_add(1, Ordering::SeqCst);
        println!(
            "[CRON] daily report trigger armed for {TRIGGER_HOUR:02}:{TRIGGER_MINUTE:02} ({})",
            self.cfg.tz_offset
        );
    }

    async fn disarm_trigger(&self) {
        let mut guard = self.trigger.lock().await;
        if let Some(trigger) = guard.take() {
            trigger.cancel.cancel();
            trigger.task.abort();
        }
    }

    /// Whole-file overwrite: persisting the same snapshot twice, or out of
    /// order relative to connection events, is harmless.
    async fn persist_credentials(&self, snapshot: &serde_json::Value) {
        if let Some(parent) = self.cfg.auth_state_file.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(snapshot) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.cfg.auth_state_file, bytes).await {
                    eprintln!("[CONN] failed to persist credential snapshot: {e}");
                }
            }
            Err(e) => eprintln!("[CONN] failed to encode credential snapshot: {e}"),
        }
    }
}

async fn trigger_loop(
    cfg: Arc<Config>,
    generator: Arc<dyn ReportGenerator>,
    state: watch::Receiver<ConnectionState>,
    current_sender: Arc<RwLock<Option<Arc<dyn MessageSender>>>>,
    group: Jid,
    cancel: CancellationToken,
) {
    loop {
        let wait = next_trigger_delay(Utc::now().with_timezone(&cfg.tz_offset));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => {
                if *state.borrow() != ConnectionState::Connected {
                    println!("[CRON] not connected, skipping scheduled report");
                    continue;
                }
                let sender = current_sender.read().await.clone();
                let Some(sender) = sender else {
                    println!("[CRON] no active session, skipping scheduled report");
                    continue;
                };

                println!("[CRON] running daily report");
                match generator.generate(None).await {
                    Ok(artifact) => {
                        let image = OutgoingImage {
                            bytes: artifact.png,
                            filename: format!("{}.png", artifact.filename),
                            caption: artifact.caption,
                            mimetype: "image/png".to_string(),
                        };
                        match sender.send_image(&group, image).await {
                            Ok(()) => println!("[CRON] daily report sent to {group}"),
                            Err(e) => eprintln!("[CRON] failed to deliver daily report: {e}"),
                        }
                    }
                    Err(e) => eprintln!("[CRON] scheduled report failed: {e}"),
                }
            }
        }
    }
}

/// Time until the next 08:31:00 in the deployment time zone.
fn next_trigger_delay(now: DateTime<FixedOffset>) -> Duration {
    let today = now
        .date_naive()
        .and_hms_opt(TRIGGER_HOUR, TRIGGER_MINUTE, 0)
        .expect("valid wall clock time");
    let offset = *now.offset();
    let mut next = offset
        .from_local_datetime(&today)
        .single()
        .expect("unambiguous fixed-offset datetime");
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::DateFormat,
        domain::ReportArtifact,
        errors::Error,
        transport::types::{CloseCode, InboundMessage},
        window::ReportWindow,
    };
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use tokio::sync::mpsc;

    struct NullSender;

    #[async_trait]
    impl MessageSender for NullSender {
        async fn send_text(&self, _chat: &Jid, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_image(&self, _chat: &Jid, _image: OutgoingImage) -> Result<()> {
            Ok(())
        }
    }

    struct NullGenerator;

    #[async_trait]
    impl ReportGenerator for NullGenerator {
        async fn generate(&self, _window: Option<ReportWindow>) -> Result<ReportArtifact> {
            Ok(ReportArtifact {
                csv_path: "r.csv".into(),
                image_path: "r.png".into(),
                filename: "r".to_string(),
                caption: "r".to_string(),
                png: vec![1],
            })
        }
    }

    /// Plays back one scripted event list per connection attempt.
    struct ScriptedTransport {
        scripts: std::sync::Mutex<VecDeque<Vec<TransportEvent>>>,
        connects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<TransportEvent>>) -> Self {
            Self {
                scripts: std::sync::Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self) -> Result<TransportSession> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Transport("no more scripted sessions".to_string()))?;

            let (tx, rx) = mpsc::channel(64);
            for event in script {
                tx.try_send(event).expect("scripted session fits the channel");
            }
            Ok(TransportSession {
                events: rx,
                sender: Arc::new(NullSender),
            })
        }
    }

    fn test_config(report_group: Option<&str>, dir: &std::path::Path) -> Arc<Config> {
        Arc::new(Config {
            base_url: None,
            app_email: None,
            app_password: None,
            project_code: 10,
            excluded_classes: HashSet::new(),
            authorized_users: Vec::new(),
            whitelist: Vec::new(),
            report_group: report_group.map(Jid::new),
            gateway_url: "ws://127.0.0.1:3001".to_string(),
            auth_state_file: dir.join("auth/state.json"),
            reports_dir: dir.join("reports"),
            report_label: "WhaTap".to_string(),
            tz_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
            date_format: DateFormat::DayMonthYear,
            source_timeout: Duration::from_secs(5),
            render_timeout: Duration::from_secs(5),
            env_file: dir.join(".env"),
        })
    }

    fn supervisor(
        cfg: Arc<Config>,
        transport: Arc<ScriptedTransport>,
    ) -> Supervisor {
        let creds = Arc::new(CredentialStore::new(cfg.env_file.clone(), None));
        Supervisor::new(cfg, transport, Arc::new(NullGenerator), creds)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
    }

    fn opened() -> TransportEvent {
        TransportEvent::Opened {
            self_jid: Jid::new("628999:3@s.whatsapp.net"),
        }
    }

    fn closed(code: u16) -> TransportEvent {
        TransportEvent::Closed {
            code: CloseCode(code),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logged_out_close_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![vec![opened(), closed(401)]]));
        let sup = supervisor(test_config(None, dir.path()), transport.clone());

        sup.run().await.unwrap();

        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(*sup.state().borrow(), ConnectionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_close_reconnects_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![opened(), closed(408)],
            vec![opened(), closed(401)],
        ]));
        let sup = supervisor(test_config(None, dir.path()), transport.clone());

        sup.run().await.unwrap();

        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_open_events_arm_the_trigger_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            opened(),
            opened(),
            closed(401),
        ]]));
        let sup = supervisor(test_config(Some("ops@g.us"), dir.path()), transport);

        sup.run().await.unwrap();

        assert_eq!(sup.times_armed(), 1);
        // Terminal state disarms; no orphan task keeps running.
        assert!(!sup.trigger_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_survives_a_reconnect_without_doubling() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![opened(), closed(428)],
            vec![opened(), closed(401)],
        ]));
        let sup = supervisor(test_config(Some("ops@g.us"), dir.path()), transport);

        sup.run().await.unwrap();

        assert_eq!(sup.times_armed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_snapshots_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(None, dir.path());
        let snapshot = serde_json::json!({"noiseKey": "abc", "registered": true});
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            opened(),
            TransportEvent::CredentialsUpdate {
                snapshot: snapshot.clone(),
            },
            closed(401),
        ]]));
        let sup = supervisor(cfg.clone(), transport);

        sup.run().await.unwrap();

        let written = std::fs::read_to_string(&cfg.auth_state_file).unwrap();
        let round: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(round, snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_flow_to_the_handler_only_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let msg = InboundMessage {
            chat: Jid::new("someone@s.whatsapp.net"),
            sender: Jid::new("someone@s.whatsapp.net"),
            text: "monitoring".to_string(),
            mentions: Vec::new(),
            from_me: false,
        };
        // A message delivered before `Opened` must not panic or reply.
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            TransportEvent::Message(msg),
            opened(),
            closed(401),
        ]]));
        let sup = supervisor(test_config(None, dir.path()), transport.clone());
        sup.run().await.unwrap();
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_trigger_delay_targets_0831_local() {
        let wib = FixedOffset::east_opt(7 * 3600).unwrap();

        let before = wib.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        assert_eq!(next_trigger_delay(before), Duration::from_secs(31 * 60));

        let after = wib.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        assert_eq!(
            next_trigger_delay(after),
            Duration::from_secs((23 * 60 + 31) * 60)
        );

        let exact = wib.with_ymd_and_hms(2024, 3, 5, 8, 31, 0).unwrap();
        assert_eq!(next_trigger_delay(exact), Duration::from_secs(24 * 3600));
    }
}
