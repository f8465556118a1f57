use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::{
    connection::{room_endpoint, ExponentialBackoff},
    error::TransportError,
};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub room: String,
    pub username: String,
    pub user_id: Option<String>,
    pub upload_path: String,
    pub reconnect_base_ms: u64,
    pub reconnect_factor: f64,
    pub reconnect_cap_ms: u64,
    pub reconnect_jitter: f64,
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_stable_ms: u64,
    pub connect_timeout_ms: u64,
    pub typing_quiet_ms: u64,
    pub typing_linger_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            room: "lobby".into(),
            username: "guest".into(),
            user_id: None,
            upload_path: "/chat/upload/".into(),
            reconnect_base_ms: 1_000,
            reconnect_factor: 2.0,
            reconnect_cap_ms: 30_000,
            reconnect_jitter: 0.2,
            reconnect_max_attempts: None,
            reconnect_stable_ms: 10_000,
            connect_timeout_ms: 10_000,
            typing_quiet_ms: 1_000,
            typing_linger_ms: 1_000,
        }
    }
}

impl ClientSettings {
    pub fn endpoint(&self) -> Result<Url, TransportError> {
        room_endpoint(&self.server_url, &self.room)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            base: Duration::from_millis(self.reconnect_base_ms),
            factor: self.reconnect_factor,
            cap: Duration::from_millis(self.reconnect_cap_ms),
            jitter: self.reconnect_jitter,
            max_attempts: self.reconnect_max_attempts,
        }
    }

    /// How long a connection must stay open before the failure count resets.
    pub fn reconnect_stable(&self) -> Duration {
        Duration::from_millis(self.reconnect_stable_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn typing_quiet(&self) -> Duration {
        Duration::from_millis(self.typing_quiet_ms)
    }

    pub fn typing_linger(&self) -> Duration {
        Duration::from_millis(self.typing_linger_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    room: Option<String>,
    username: Option<String>,
    user_id: Option<String>,
    upload_path: Option<String>,
    reconnect_base_ms: Option<u64>,
    reconnect_factor: Option<f64>,
    reconnect_cap_ms: Option<u64>,
    reconnect_jitter: Option<f64>,
    reconnect_max_attempts: Option<u32>,
    reconnect_stable_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    typing_quiet_ms: Option<u64>,
    typing_linger_ms: Option<u64>,
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| {
        std::env::var(key).ok()
    })
}

/// Defaults, then the settings file if it exists, then `APP__*` overrides.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable settings file"),
        }
    }

    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__ROOM") {
        settings.room = v;
    }
    if let Some(v) = env("APP__USERNAME") {
        settings.username = v;
    }
    if let Some(v) = env("APP__USER_ID") {
        settings.user_id = Some(v);
    }
    if let Some(v) = env("APP__UPLOAD_PATH") {
        settings.upload_path = v;
    }

    if let Some(v) = parsed(&env, "APP__RECONNECT_BASE_MS") {
        settings.reconnect_base_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_FACTOR") {
        settings.reconnect_factor = v;
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_CAP_MS") {
        settings.reconnect_cap_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_JITTER") {
        settings.reconnect_jitter = v;
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_MAX_ATTEMPTS") {
        settings.reconnect_max_attempts = Some(v);
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_STABLE_MS") {
        settings.reconnect_stable_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__CONNECT_TIMEOUT_MS") {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__TYPING_QUIET_MS") {
        settings.typing_quiet_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__TYPING_LINGER_MS") {
        settings.typing_linger_ms = v;
    }

    settings
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting override");
            None
        }
    }
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.room {
        settings.room = v;
    }
    if let Some(v) = file_cfg.username {
        settings.username = v;
    }
    if file_cfg.user_id.is_some() {
        settings.user_id = file_cfg.user_id;
    }
    if let Some(v) = file_cfg.upload_path {
        settings.upload_path = v;
    }
    if let Some(v) = file_cfg.reconnect_base_ms {
        settings.reconnect_base_ms = v;
    }
    if let Some(v) = file_cfg.reconnect_factor {
        settings.reconnect_factor = v;
    }
    if let Some(v) = file_cfg.reconnect_cap_ms {
        settings.reconnect_cap_ms = v;
    }
    if let Some(v) = file_cfg.reconnect_jitter {
        settings.reconnect_jitter = v;
    }
    if file_cfg.reconnect_max_attempts.is_some() {
        settings.reconnect_max_attempts = file_cfg.reconnect_max_attempts;
    }
    if let Some(v) = file_cfg.reconnect_stable_ms {
        settings.reconnect_stable_ms = v;
    }
    if let Some(v) = file_cfg.connect_timeout_ms {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = file_cfg.typing_quiet_ms {
        settings.typing_quiet_ms = v;
    }
    if let Some(v) = file_cfg.typing_linger_ms {
        settings.typing_linger_ms = v;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn temp_file(contents: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("room_client_settings_{suffix}.toml"));
        fs::write(&path, contents).expect("write settings");
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from(Path::new("/nonexistent/client.toml"), no_env);
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(
            settings.endpoint().expect("endpoint").as_str(),
            "ws://127.0.0.1:8000/ws/chat/lobby/"
        );
    }

    #[test]
    fn file_then_env_overrides() {
        let path = temp_file(
            r#"
server_url = "https://chat.example.com"
room = "general"
reconnect_max_attempts = 5
typing_quiet_ms = 750
connect_timeout_ms = 4000
"#,
        );
        let env: HashMap<&str, &str> = HashMap::from([
            ("APP__ROOM", "random"),
            ("APP__USERNAME", "alice"),
            ("APP__RECONNECT_CAP_MS", "10000"),
            ("APP__TYPING_LINGER_MS", "not-a-number"),
            ("APP__RECONNECT_STABLE_MS", "2500"),
        ]);

        let settings = load_settings_from(&path, |key| env.get(key).map(|v| v.to_string()));
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.server_url, "https://chat.example.com");
        assert_eq!(settings.room, "random");
        assert_eq!(settings.username, "alice");
        assert_eq!(settings.reconnect_max_attempts, Some(5));
        assert_eq!(settings.reconnect_cap_ms, 10_000);
        assert_eq!(settings.typing_quiet(), Duration::from_millis(750));
        assert_eq!(settings.typing_linger_ms, 1_000);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(4));
        assert_eq!(settings.reconnect_stable(), Duration::from_millis(2_500));

        let backoff = settings.backoff();
        assert_eq!(backoff.cap, Duration::from_secs(10));
        assert_eq!(backoff.max_attempts, Some(5));
    }
}
