use super::{ConnectionParams, CountShape, Counts, FetchError, FetchRequest, FetchStrategy};
use async_native_tls::{TlsConnector, TlsStream};
use async_std::{net::TcpStream, task};
use log::{debug, trace};

pub type ImapClient = async_imap::Client<TlsStream<TcpStream>>;
pub type ImapSession = async_imap::Session<TlsStream<TcpStream>>;

pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Well-known providers, pre-binding host and port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImapPreset {
    Gmail,
    MailRu,
}
impl ImapPreset {
    pub fn connection(self) -> ConnectionParams {
        match self {
            ImapPreset::Gmail => ConnectionParams::new("imap.gmail.com", 993),
            ImapPreset::MailRu => ConnectionParams::new("imap.mail.ru", 993),
        }
    }
}

fn is_transport_error(err: &async_imap::error::Error) -> bool {
    matches!(
        err,
        async_imap::error::Error::Io(_) | async_imap::error::Error::ConnectionLost
    )
}

/// Maps a failed `SELECT`/`SEARCH`. The session survives either way.
fn request_error(err: async_imap::error::Error, mailbox: &str) -> FetchError {
    if is_transport_error(&err) {
        FetchError::Connectivity(err.to_string())
    } else {
        FetchError::Rejected(format!("IMAP request on {} failed: {}", mailbox, err))
    }
}

/// Counts unseen messages of one mailbox. A fresh connection is used per fetch.
pub struct ImapStrategy {
    log_target: String,
}
impl ImapStrategy {
    pub fn new(name: &str) -> Self {
        Self {
            log_target: format!("Imap[{}]", name),
        }
    }

    async fn client(connection: &ConnectionParams) -> Result<ImapClient, FetchError> {
        let tls = TlsConnector::new();
        async_imap::connect(
            (connection.host.as_str(), connection.port),
            connection.host.as_str(),
            tls,
        )
        .await
        .map_err(|e| FetchError::Connectivity(e.to_string()))
    }

    async fn session(request: FetchRequest<'_>) -> Result<ImapSession, FetchError> {
        let client = Self::client(request.connection).await?;
        client
            .login(&request.credentials.login, &request.credentials.secret)
            .await
            .map_err(|(e, _)| {
                if is_transport_error(&e) {
                    FetchError::Connectivity(e.to_string())
                } else {
                    FetchError::Authentication(e.to_string())
                }
            })
    }

    async fn unseen_count(
        session: &mut ImapSession,
        mailbox: &str,
    ) -> async_imap::error::Result<u32> {
        session.select(mailbox).await?;
        let unseen = session.search("UNSEEN").await?;
        Ok(unseen.len() as u32)
    }

    async fn fetch_async(&self, request: FetchRequest<'_>) -> Result<u32, FetchError> {
        if request.connection.host.is_empty() {
            return Err(FetchError::FatalConfiguration(
                "IMAP host is not configured".to_owned(),
            ));
        }
        let mut session = Self::session(request).await?;
        let mailbox = request
            .credentials
            .scope
            .as_deref()
            .unwrap_or(DEFAULT_MAILBOX);
        trace!(target: &self.log_target, "Searching unseen mails in {}", mailbox);
        let result = Self::unseen_count(&mut session, mailbox).await;
        // the count is already known, a failing logout changes nothing about it
        if let Err(e) = session.logout().await {
            debug!(target: &self.log_target, "Logout failed: {}", e);
        }
        result.map_err(|e| request_error(e, mailbox))
    }
}
impl FetchStrategy for ImapStrategy {
    fn shape(&self) -> CountShape {
        CountShape::Single
    }

    fn fetch(&mut self, request: FetchRequest<'_>) -> Result<Counts, FetchError> {
        debug!(
            target: &self.log_target,
            "Polling {}:{}", request.connection.host, request.connection.port
        );
        task::block_on(self.fetch_async(request)).map(Counts::Single)
    }
}
