//! Lobby configuration schema and loader
//!
//! Defines the TOML config format read by the `lobbyist` binary.
//! The default location is `<config_dir>/lobbyist.toml`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Default lobby server port
pub const DEFAULT_PORT: u16 = 8200;

/// Config file name inside the config directory
const CONFIG_FILE_NAME: &str = "lobbyist.toml";

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// Server and account settings
    pub lobby: LobbySection,
    /// Client identity and behavior
    #[serde(default)]
    pub client: ClientSection,
    /// Timer overrides
    #[serde(default)]
    pub timing: TimingSection,
}

/// Server and account section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account name used for LOGIN
    #[serde(default)]
    pub user: Option<String>,
    /// Plaintext password, hashed before it is sent
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Channels joined on every accepted login
    #[serde(default)]
    pub channels: Vec<String>,
    /// Compatibility flags sent with LOGIN
    #[serde(default)]
    pub flags: String,
    /// Connect over TLS
    #[serde(default)]
    pub ssl: bool,
    /// Verify the server certificate when `ssl` is set
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

/// Client identity section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Client name reported in LOGIN
    #[serde(default = "default_client_name")]
    pub name: String,
    /// CPU speed field reported in LOGIN
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Reply to channel chatter (used by the bundled responder)
    #[serde(default)]
    pub echo: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            cpu: default_cpu(),
            echo: false,
        }
    }
}

/// Timer section, all fields optional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Time allowed for the login exchange before the connection is dropped
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            registration_timeout_secs: default_registration_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_client_name() -> String {
    "lobbyist".to_string()
}

fn default_cpu() -> u32 {
    3200
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    29
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_registration_timeout_secs() -> u64 {
    90
}

impl LobbyConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), host = %config.lobby.host, "Loaded config");
        Ok(config)
    }

    /// Parse and validate config from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: LobbyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path under the user's config directory
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "springrts", "lobbyist").ok_or(Error::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.lobby.host.trim().is_empty() {
            return Err(Error::InvalidConfig("lobby.host must not be empty".into()));
        }
        if self.lobby.port == 0 {
            return Err(Error::InvalidConfig("lobby.port must not be 0".into()));
        }
        if self.lobby.pass.is_some() && self.lobby.user.is_none() {
            return Err(Error::InvalidConfig("lobby.pass is set without lobby.user".into()));
        }
        let timing = &self.timing;
        if timing.flush_interval_ms == 0
            || timing.heartbeat_interval_secs == 0
            || timing.heartbeat_timeout_secs == 0
            || timing.registration_timeout_secs == 0
        {
            return Err(Error::InvalidConfig("timer intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// Login credentials, when both user and password are configured
    pub fn credentials(&self) -> Option<Credentials> {
        let user = self.lobby.user.as_ref()?;
        let pass = self.lobby.pass.as_ref()?;
        let mut creds = Credentials::new(user.clone(), pass);
        if let Some(email) = &self.lobby.email {
            creds = creds.with_email(email.clone());
        }
        Some(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[lobby]
host = "lobby.springrts.com"
"#;
        let config = LobbyConfig::from_toml(toml).unwrap();
        assert_eq!(config.lobby.host, "lobby.springrts.com");
        assert_eq!(config.lobby.port, DEFAULT_PORT);
        assert!(!config.lobby.ssl);
        assert!(config.lobby.ssl_verify);
        assert!(config.lobby.channels.is_empty());
        assert_eq!(config.client.name, "lobbyist");
        assert_eq!(config.client.cpu, 3200);
        assert_eq!(config.timing, TimingSection::default());
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[lobby]
host = "lobby.example.org"
port = 8201
user = "bigbot"
pass = "password"
channels = ["main", "newbies"]
flags = "sp b u"
ssl = true
ssl_verify = false

[client]
name = "bigbot-client"
echo = true

[timing]
heartbeat_interval_secs = 15
reconnect_delay_secs = 5
"#;
        let config = LobbyConfig::from_toml(toml).unwrap();
        assert_eq!(config.lobby.port, 8201);
        assert_eq!(config.lobby.channels, vec!["main", "newbies"]);
        assert_eq!(config.lobby.flags, "sp b u");
        assert!(config.lobby.ssl);
        assert!(!config.lobby.ssl_verify);
        assert_eq!(config.client.name, "bigbot-client");
        assert!(config.client.echo);
        assert_eq!(config.timing.heartbeat_interval_secs, 15);
        assert_eq!(config.timing.heartbeat_timeout_secs, 90);
        assert_eq!(config.timing.reconnect_delay_secs, 5);
        assert_eq!(config.timing.registration_timeout_secs, 90);

        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "bigbot");
        assert_eq!(creds.password_hash, "X03MO1qnZdYdgyfeuILPmQ==");
    }

    #[test]
    fn test_empty_host_rejected() {
        let toml = r#"
[lobby]
host = "  "
"#;
        let err = LobbyConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_password_without_user_rejected() {
        let toml = r#"
[lobby]
host = "lobby.example.org"
pass = "secret"
"#;
        assert!(matches!(
            LobbyConfig::from_toml(toml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_timer_rejected() {
        for field in ["flush_interval_ms", "heartbeat_interval_secs", "registration_timeout_secs"] {
            let toml = format!("[lobby]\nhost = \"localhost\"\n\n[timing]\n{field} = 0\n");
            assert!(
                matches!(LobbyConfig::from_toml(&toml), Err(Error::InvalidConfig(_))),
                "{field} = 0 was accepted"
            );
        }
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            LobbyConfig::from_toml("[lobby"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lobbyist.toml");
        std::fs::write(&path, "[lobby]\nhost = \"127.0.0.1\"\nport = 8300\n").unwrap();

        let config = LobbyConfig::load(&path).unwrap();
        assert_eq!(config.lobby.host, "127.0.0.1");
        assert_eq!(config.lobby.port, 8300);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            LobbyConfig::load(&path),
            Err(Error::ConfigNotFound(_))
        ));
    }
}
