use crate::{
    config::{BackendConfig, ConfigContainer, DeviceConfig, LoginConfig, SessionConfig},
    devices::{exec::ExecDevice, logger::LogDevice, DeviceSink},
    session::{PollingSession, SessionHandle},
    status::StatusBus,
    strategies::{
        chat::ChatStrategy,
        imap::{ImapPreset, ImapStrategy},
        rpc::RpcStrategy,
        scripted::ScriptedStrategy,
        ConnectionParams, Credentials, FetchStrategy,
    },
};
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use std::{
    sync::mpsc::{self, RecvTimeoutError},
    time::Duration,
};

fn credentials(auth: &LoginConfig, scope: Option<&String>) -> Credentials {
    Credentials {
        login: auth.user.clone(),
        secret: auth.password.clone(),
        scope: scope.cloned(),
    }
}

fn build_session(name: &str, config: &SessionConfig) -> Result<PollingSession> {
    let (strategy, connection, credentials): (Box<dyn FetchStrategy>, _, _) = match &config.backend {
        BackendConfig::Imap(imap) => (
            Box::new(ImapStrategy::new(name)),
            ConnectionParams::new(imap.server.as_str(), imap.port),
            credentials(&imap.auth, imap.mailbox.as_ref()),
        ),
        BackendConfig::Gmail(imap) => (
            Box::new(ImapStrategy::new(name)),
            ImapPreset::Gmail.connection(),
            credentials(&imap.auth, imap.mailbox.as_ref()),
        ),
        BackendConfig::MailRu(imap) => (
            Box::new(ImapStrategy::new(name)),
            ImapPreset::MailRu.connection(),
            credentials(&imap.auth, imap.mailbox.as_ref()),
        ),
        BackendConfig::Slack(chat) => (
            Box::new(
                ChatStrategy::new(name, chat.api_url.clone())
                    .context("Failed to create HTTP client")?,
            ),
            ConnectionParams::default(),
            Credentials::new(chat.token.as_str(), ""),
        ),
        BackendConfig::Odoo(rpc) => (
            Box::new(RpcStrategy::new(name).context("Failed to create HTTP client")?),
            ConnectionParams::new(rpc.server.as_str(), rpc.port).with_database(rpc.database.as_str()),
            credentials(&rpc.auth, None),
        ),
        BackendConfig::Test(script) => (
            Box::new(ScriptedStrategy::new(name, script.steps.clone())),
            ConnectionParams::default(),
            Credentials::default(),
        ),
    };

    let device: Box<dyn DeviceSink> = match &config.device {
        None | Some(DeviceConfig::Log) => Box::new(LogDevice::new(name)),
        Some(DeviceConfig::Exec(exec)) => Box::new(ExecDevice::new(name.to_owned(), exec)),
    };

    let bus = StatusBus::new();
    let status_target = format!("Status[{}]", name);
    bus.subscribe(move |event| debug!(target: &status_target, "{}", event.status));

    let mut session =
        PollingSession::new(name, strategy, device, bus).with_interval(config.interval());
    session.configure(connection, credentials);
    Ok(session)
}

pub struct SupervisorStopSender {
    stop_sender: mpsc::Sender<()>,
}
impl SupervisorStopSender {
    pub fn stop(&self) {
        // the supervisor is gone already if this fails, nothing left to stop
        let _ = self.stop_sender.send(());
    }
}

/// Runs every configured session on its own thread until asked to stop or
/// until all of them ended on their own.
pub struct Supervisor {
    sessions: Vec<PollingSession>,
    stop_sender: mpsc::Sender<()>,
    stop_receiver: mpsc::Receiver<()>,
}
impl Supervisor {
    pub fn from_config(config: &ConfigContainer) -> Result<Self> {
        let mut names: Vec<_> = config.sessions.keys().collect();
        names.sort();
        let sessions = names
            .into_iter()
            .map(|name| {
                build_session(name, &config.sessions[name])
                    .with_context(|| format!("Failed to set up session: {}", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_sessions(sessions))
    }

    pub fn from_sessions(sessions: Vec<PollingSession>) -> Self {
        let (stop_sender, stop_receiver) = mpsc::channel();
        Self {
            sessions,
            stop_sender,
            stop_receiver,
        }
    }

    pub fn get_stop_sender(&self) -> SupervisorStopSender {
        SupervisorStopSender {
            stop_sender: self.stop_sender.clone(),
        }
    }

    pub fn run(self) -> Result<()> {
        info!(target: "Supervisor", "Starting.");
        let mut handles: Vec<SessionHandle> = Vec::new();
        for session in self.sessions {
            let name = session.name().to_owned();
            info!(target: "Supervisor", "Starting session: {}", name);
            match session.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(target: "Supervisor", "Failed to start session {}: {}", name, e);
                    handles.iter().for_each(SessionHandle::stop);
                    return Err(anyhow!(e).context(format!("Failed to start session: {}", name)));
                }
            }
        }

        loop {
            match self.stop_receiver.recv_timeout(Duration::from_millis(250)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!(target: "Supervisor", "Stop requested");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if handles.iter().all(SessionHandle::is_finished) {
                info!(target: "Supervisor", "All sessions ended");
                break;
            }
        }

        info!(target: "Supervisor", "Shutting down");
        handles.iter().for_each(SessionHandle::stop);
        let mut failed = Vec::new();
        for handle in handles {
            let name = handle.name().to_owned();
            match handle.join() {
                Ok(()) => info!(target: "Supervisor", "Session {} stopped", name),
                Err(e) => {
                    error!(target: "Supervisor", "Session {} failed: {}", name, e);
                    failed.push(name);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Sessions failed: {}", failed.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScriptStep, ScriptedBackendConfig};
    use std::{collections::HashMap, thread};

    fn scripted(steps: Vec<ScriptStep>) -> SessionConfig {
        SessionConfig {
            backend: BackendConfig::Test(ScriptedBackendConfig { steps }),
            interval: Some(0.1),
            device: None,
        }
    }

    #[test]
    fn sessions_run_until_stopped() {
        let config = ConfigContainer {
            sessions: HashMap::from([
                ("a".to_owned(), scripted(vec![ScriptStep::Count { count: 1 }])),
                ("b".to_owned(), scripted(vec![ScriptStep::ConnectionFailure])),
            ]),
        };
        let supervisor = Supervisor::from_config(&config).unwrap();
        let stop = supervisor.get_stop_sender();
        let worker = thread::spawn(move || supervisor.run());
        thread::sleep(Duration::from_millis(300));
        stop.stop();
        stop.stop();
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn fatal_session_failure_is_reported() {
        let config = ConfigContainer {
            sessions: HashMap::from([(
                "broken".to_owned(),
                scripted(vec![ScriptStep::Fatal {
                    message: "invalid_auth".to_owned(),
                }]),
            )]),
        };
        // no stop request: the supervisor notices that every session ended
        let err = Supervisor::from_config(&config).unwrap().run().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn sessions_are_configured_from_backend() {
        let config = SessionConfig {
            backend: BackendConfig::Gmail(crate::config::ImapPresetBackendConfig {
                auth: LoginConfig {
                    user: "me@gmail.com".to_owned(),
                    password: "app-password".to_owned(),
                },
                mailbox: Some("Work".to_owned()),
            }),
            interval: None,
            device: None,
        };
        let session = build_session("private", &config).unwrap();
        assert_eq!(session.name(), "private");
        assert_eq!(session.connection().host, "imap.gmail.com");
        assert_eq!(session.credentials().scope.as_deref(), Some("Work"));
    }
}
