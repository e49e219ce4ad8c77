use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::FixedOffset;
use tokio::sync::RwLock;

use crate::{
    command::DateFormat,
    domain::{AuthorizationContext, Jid},
    errors::Error,
    Result,
};

/// Typed configuration for the bot, loaded from the environment with `.env`
/// support (values already in the environment win).
#[derive(Clone, Debug)]
pub struct Config {
    // Report source
    pub base_url: Option<String>,
    pub app_email: Option<String>,
    pub app_password: Option<String>,
    pub project_code: u32,
    pub excluded_classes: HashSet<String>,

    // Messaging
    pub authorized_users: Vec<Jid>,
    pub whitelist: Vec<Jid>,
    /// Destination for the scheduled daily report. Unset disables the daily
    /// trigger and enables group-address discovery logging.
    pub report_group: Option<Jid>,
    pub gateway_url: String,
    pub auth_state_file: PathBuf,

    // Report artifacts
    pub reports_dir: PathBuf,
    pub report_label: String,

    // Behavior
    pub tz_offset: FixedOffset,
    pub date_format: DateFormat,
    pub source_timeout: Duration,
    pub render_timeout: Duration,

    /// The `.env` file that `!setpassword` rewrites.
    pub env_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(".env"))
    }

    pub fn load_from(env_file: &Path) -> Result<Self> {
        load_dotenv_if_present(env_file);

        let base_url = env_str("BASE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string());
        let app_email = env_str("APP_EMAIL").and_then(non_empty);
        let app_password = env_str("APP_PASSWORD").and_then(non_empty);
        let project_code = env_u32("PROJECT_CODE").unwrap_or(10);
        let excluded_classes = parse_csv(env_str("EXCLUDED_CLASSES")).into_iter().collect();

        let authorized_users = parse_csv_jids(env_str("AUTHORIZED_USERS"));
        let whitelist = parse_csv_jids(env_str("WHITELIST"));
        let report_group = env_str("WHATSAPP_GROUP_JID").and_then(non_empty).map(Jid::new);
        let gateway_url =
            env_str("GATEWAY_URL").unwrap_or_else(|| "ws://127.0.0.1:3001".to_string());
        let auth_state_file = env_path("AUTH_STATE_FILE")
            .unwrap_or_else(|| PathBuf::from("auth_info/state.json"));

        let reports_dir = env_path("REPORTS_DIR").unwrap_or_else(|| PathBuf::from("reports"));
        let report_label = env_str("REPORT_LABEL").unwrap_or_else(|| "WhaTap".to_string());

        let tz_hours = env_i32("TZ_OFFSET_HOURS").unwrap_or(7);
        let tz_offset = FixedOffset::east_opt(tz_hours * 3600)
            .ok_or_else(|| Error::Config(format!("invalid TZ_OFFSET_HOURS: {tz_hours}")))?;

        let date_format = match env_str("DATE_FORMAT") {
            None => DateFormat::DayMonthYear,
            Some(raw) => DateFormat::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "invalid DATE_FORMAT: {raw} (expected DD-MM-YYYY or YYYY-MM-DD)"
                ))
            })?,
        };

        let source_timeout = Duration::from_secs(env_u64("SOURCE_TIMEOUT_SECS").unwrap_or(30));
        let render_timeout = Duration::from_secs(env_u64("RENDER_TIMEOUT_SECS").unwrap_or(60));

        Ok(Self {
            base_url,
            app_email,
            app_password,
            project_code,
            excluded_classes,
            authorized_users,
            whitelist,
            report_group,
            gateway_url,
            auth_state_file,
            reports_dir,
            report_label,
            tz_offset,
            date_format,
            source_timeout,
            render_timeout,
            env_file: env_file.to_path_buf(),
        })
    }

    pub fn authorization(&self) -> AuthorizationContext {
        AuthorizationContext {
            authorized_users: self.authorized_users.clone(),
            whitelist: self.whitelist.clone(),
        }
    }
}

/// The `!setpassword` side channel: serves the current report-source password
/// to pipeline runs and persists updates back into the `.env` file so they
/// survive a restart.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Option<String>>,
}

impl CredentialStore {
    pub fn new(path: PathBuf, initial: Option<String>) -> Self {
        Self {
            path,
            current: RwLock::new(initial),
        }
    }

    pub async fn password(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Replace (or append) the `APP_PASSWORD` line. Whole-file rewrite, so
    /// repeated updates with the same value are idempotent and updates are
    /// order-independent.
    pub async fn update(&self, new_password: &str) -> Result<()> {
        let line = format!("APP_PASSWORD=\"{new_password}\"");

        let contents = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();
        let mut lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
        match lines.iter_mut().find(|l| l.starts_with("APP_PASSWORD=")) {
            Some(existing) => *existing = line,
            None => lines.push(line),
        }

        let mut out = lines.join("\n");
        out.push('\n');
        tokio::fs::write(&self.path, out).await?;

        *self.current.write().await = Some(new_password.to_string());
        Ok(())
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_i32(key: &str) -> Option<i32> {
    env_str(key).and_then(|s| s.trim().parse::<i32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_csv_jids(v: Option<String>) -> Vec<Jid> {
    parse_csv(v).into_iter().map(Jid::new).collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dotenv_loads_and_strips_quotes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "WMB_TEST_DOTENV_A=\"quoted value\"").unwrap();
        writeln!(f, "WMB_TEST_DOTENV_B=plain").unwrap();
        load_dotenv_if_present(f.path());
        assert_eq!(env::var("WMB_TEST_DOTENV_A").unwrap(), "quoted value");
        assert_eq!(env::var("WMB_TEST_DOTENV_B").unwrap(), "plain");
    }

    #[test]
    fn dotenv_does_not_override_existing_env() {
        env::set_var("WMB_TEST_DOTENV_KEEP", "original");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "WMB_TEST_DOTENV_KEEP=overwritten").unwrap();
        load_dotenv_if_present(f.path());
        assert_eq!(env::var("WMB_TEST_DOTENV_KEEP").unwrap(), "original");
    }

    #[tokio::test]
    async fn credential_store_appends_when_absent() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let store = CredentialStore::new(f.path().to_path_buf(), None);
        store.update("secret123").await.unwrap();

        let contents = fs::read_to_string(f.path()).unwrap();
        assert!(contents.contains("APP_PASSWORD=\"secret123\""));
        assert_eq!(store.password().await.as_deref(), Some("secret123"));
    }

    #[tokio::test]
    async fn credential_store_replaces_existing_line() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "BASE_URL=https://example.com").unwrap();
        writeln!(f, "APP_PASSWORD=\"old\"").unwrap();
        writeln!(f, "APP_EMAIL=bot@example.com").unwrap();

        let store = CredentialStore::new(f.path().to_path_buf(), Some("old".to_string()));
        store.update("new-pass").await.unwrap();
        store.update("new-pass").await.unwrap();

        let contents = fs::read_to_string(f.path()).unwrap();
        assert_eq!(
            contents.matches("APP_PASSWORD=").count(),
            1,
            "exactly one APP_PASSWORD line: {contents}"
        );
        assert!(contents.contains("APP_PASSWORD=\"new-pass\""));
        assert!(contents.contains("BASE_URL=https://example.com"));
        assert!(contents.contains("APP_EMAIL=bot@example.com"));
    }

    #[tokio::test]
    async fn credential_store_round_trips_through_dotenv_loader() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let store = CredentialStore::new(f.path().to_path_buf(), None);
        store.update("round trip").await.unwrap();

        load_dotenv_if_present(f.path());
        assert_eq!(env::var("APP_PASSWORD").unwrap(), "round trip");
        env::remove_var("APP_PASSWORD");
    }
}
