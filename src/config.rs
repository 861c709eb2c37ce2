use anyhow::{bail, Context, Result};
use serde_derive::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConfigContainer {
    pub sessions: HashMap<String, SessionConfig>,
}
impl ConfigContainer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ConfigContainer> {
        let path = path.as_ref();
        let config_file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        let reader = BufReader::new(config_file);
        let config: ConfigContainer =
            serde_json::from_reader(reader).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }
    fn validate(&self) -> Result<()> {
        if self.sessions.is_empty() {
            bail!("No sessions configured");
        }
        for (name, session) in &self.sessions {
            session
                .validate()
                .with_context(|| format!("Invalid session: {}", name))?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub backend: BackendConfig,
    /// Seconds between two polls, overrides the backend's default.
    pub interval: Option<f64>,
    pub device: Option<DeviceConfig>,
}
impl SessionConfig {
    pub fn interval(&self) -> f64 {
        self.interval
            .unwrap_or_else(|| self.backend.default_interval())
    }
    fn validate(&self) -> Result<()> {
        if let Some(interval) = self.interval {
            if !interval.is_finite() || interval <= 0.0 {
                bail!("interval must be a positive number of seconds");
            }
        }
        match &self.backend {
            BackendConfig::Imap(config) if config.server.is_empty() => bail!("server is empty"),
            BackendConfig::Odoo(config) if config.server.is_empty() => bail!("server is empty"),
            BackendConfig::Odoo(config) if config.database.is_empty() => {
                bail!("database is empty")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoginConfig {
    pub user: String,
    pub password: String,
}

// #############
// # Backends
// #############

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ImapBackendConfig {
    pub server: String,
    pub port: u16,
    pub auth: LoginConfig,
    pub mailbox: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ImapPresetBackendConfig {
    pub auth: LoginConfig,
    pub mailbox: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChatBackendConfig {
    pub token: String,
    pub api_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct RpcBackendConfig {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub auth: LoginConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
pub enum ScriptStep {
    #[serde(rename = "count")]
    Count { count: u32 },
    #[serde(rename = "pair")]
    Pair { tasks: u32, issues: u32 },
    #[serde(rename = "auth_failure")]
    AuthFailure,
    #[serde(rename = "connection_failure")]
    ConnectionFailure,
    #[serde(rename = "rejected")]
    Rejected { message: String },
    #[serde(rename = "fatal")]
    Fatal { message: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScriptedBackendConfig {
    pub steps: Vec<ScriptStep>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
pub enum BackendConfig {
    #[serde(rename = "imap")]
    Imap(ImapBackendConfig),
    #[serde(rename = "gmail")]
    Gmail(ImapPresetBackendConfig),
    #[serde(rename = "mailru")]
    MailRu(ImapPresetBackendConfig),
    #[serde(rename = "slack")]
    Slack(ChatBackendConfig),
    #[serde(rename = "odoo")]
    Odoo(RpcBackendConfig),
    #[serde(rename = "test")]
    Test(ScriptedBackendConfig),
}
impl BackendConfig {
    pub fn default_interval(&self) -> f64 {
        match self {
            BackendConfig::Imap(_) | BackendConfig::Gmail(_) | BackendConfig::MailRu(_) => 20.0,
            BackendConfig::Slack(_) => 10.0,
            BackendConfig::Odoo(_) => 90.0,
            BackendConfig::Test(_) => 1.0,
        }
    }
}

// #############
// # Devices
// #############

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExecDeviceConfig {
    pub executable: String,
    pub arguments: Option<Vec<String>>,
    pub environment: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
#[serde(tag = "type")]
pub enum DeviceConfig {
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "exec")]
    Exec(ExecDeviceConfig),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_case::test_case;

    fn load(json: &str) -> Result<ConfigContainer> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        ConfigContainer::from_file(file.path())
    }

    #[test]
    fn full_config_is_parsed() {
        let config = load(
            r#"{
                "sessions": {
                    "work": {
                        "backend": {
                            "type": "imap", "server": "mail.example.org", "port": 993,
                            "auth": { "user": "me", "password": "secret" },
                            "mailbox": "INBOX/Team"
                        },
                        "interval": 5.5,
                        "device": { "type": "exec", "executable": "ledctl", "arguments": ["-d", "0"] }
                    },
                    "private": {
                        "backend": { "type": "gmail", "auth": { "user": "me", "password": "secret" } }
                    },
                    "chat": { "backend": { "type": "slack", "token": "xoxp-1" }, "device": { "type": "log" } },
                    "projects": {
                        "backend": {
                            "type": "odoo", "server": "odoo.local", "port": 8069, "database": "prod",
                            "auth": { "user": "admin", "password": "admin" }
                        }
                    },
                    "dry": {
                        "backend": { "type": "test", "steps": [
                            { "type": "count", "count": 2 },
                            { "type": "auth_failure" },
                            { "type": "rejected", "message": "Unknown Mailbox" },
                            { "type": "pair", "tasks": 1, "issues": 0 }
                        ] }
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.sessions.len(), 5);
        assert_eq!(config.sessions["work"].interval(), 5.5);
        assert_eq!(config.sessions["private"].interval(), 20.0);
        assert_eq!(config.sessions["chat"].interval(), 10.0);
        assert_eq!(config.sessions["projects"].interval(), 90.0);
        assert!(matches!(
            config.sessions["work"].device,
            Some(DeviceConfig::Exec(ref exec)) if exec.executable == "ledctl"
        ));
        match &config.sessions["dry"].backend {
            BackendConfig::Test(script) => assert_eq!(
                script.steps,
                vec![
                    ScriptStep::Count { count: 2 },
                    ScriptStep::AuthFailure,
                    ScriptStep::Rejected {
                        message: "Unknown Mailbox".to_owned()
                    },
                    ScriptStep::Pair { tasks: 1, issues: 0 }
                ]
            ),
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test_case(r#"{ "sessions": {} }"# ; "no sessions")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "test", "steps": [] }, "interval": 0 } } }"# ; "zero interval")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "test", "steps": [] }, "interval": -3 } } }"# ; "negative interval")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "imap", "server": "", "port": 993, "auth": { "user": "u", "password": "p" } } } } }"# ; "empty server")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "odoo", "server": "h", "port": 1, "database": "", "auth": { "user": "u", "password": "p" } } } } }"# ; "empty database")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "pop3" } } } }"# ; "unknown backend")]
    #[test_case(r#"{ "sessions": { "a": { "backend": { "type": "test", "steps": [] }, "colour": "red" } } }"# ; "unknown field")]
    fn invalid_configs_are_rejected(json: &str) {
        assert!(load(json).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ConfigContainer::from_file("/nonexistent/unreadblink.json").unwrap_err();
        assert!(err.to_string().contains("Failed to open config file"));
    }
}
