pub mod chat;
pub mod imap;
pub mod rpc;
pub mod scripted;
mod xmlrpc;

use std::fmt;
use thiserror::Error;

/// Where a strategy connects to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
}
impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            database: None,
        }
    }
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
    /// Mailbox (IMAP) the count is restricted to.
    pub scope: Option<String>,
}
impl Credentials {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
            scope: None,
        }
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("secret", &"<hidden>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Everything a strategy needs for one fetch.
#[derive(Clone, Copy, Debug)]
pub struct FetchRequest<'a> {
    pub connection: &'a ConnectionParams,
    pub credentials: &'a Credentials,
}

/// Outcome of a successful fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counts {
    Single(u32),
    Pair { tasks: u32, issues: u32 },
}

/// Which kind of [`Counts`] a strategy produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountShape {
    Single,
    Pair,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("no connection to server: {0}")]
    Connectivity(String),
    /// One of several independent queries failed. Strategies recover from
    /// this themselves, it never reaches the session.
    #[error("remote query on {entity} failed: {reason}")]
    RemoteQuery { entity: String, reason: String },
    /// The server was reached but refused or garbled a request after login.
    #[error("request rejected by server: {0}")]
    Rejected(String),
    #[error("{0}")]
    FatalConfiguration(String),
    #[error("{0}")]
    Unclassified(String),
}
impl FetchError {
    /// Whether the session may carry on with its next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FetchError::Authentication(_)
                | FetchError::Connectivity(_)
                | FetchError::RemoteQuery { .. }
                | FetchError::Rejected(_)
        )
    }
}

/// Backend specific fetch logic of a polling session.
pub trait FetchStrategy: Send {
    fn shape(&self) -> CountShape;
    fn fetch(&mut self, request: FetchRequest<'_>) -> Result<Counts, FetchError>;
}
