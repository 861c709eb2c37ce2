use super::{
    xmlrpc::{HttpTransport, RpcTransport, Value, XmlRpcError},
    ConnectionParams, CountShape, Counts, FetchError, FetchRequest, FetchStrategy,
};
use log::{debug, warn};

pub const TASK_MODEL: &str = "project.task";
pub const ISSUE_MODEL: &str = "project.issue";

fn unread_domain() -> Value {
    Value::Array(vec![Value::Array(vec![
        Value::from("message_unread"),
        Value::from("="),
        Value::from(true),
    ])])
}

fn classify(err: XmlRpcError) -> FetchError {
    match err {
        XmlRpcError::Transport(reason) => FetchError::Connectivity(reason),
        XmlRpcError::Fault { message, .. } => FetchError::Authentication(message),
        XmlRpcError::Malformed(reason) => FetchError::Rejected(reason),
    }
}

/// Counts unread tasks and issues of a project-management object server.
pub struct RpcStrategy {
    log_target: String,
    transport: Box<dyn RpcTransport>,
}
impl RpcStrategy {
    pub fn new(name: &str) -> Result<Self, XmlRpcError> {
        Ok(Self::with_transport(name, Box::new(HttpTransport::new()?)))
    }

    pub fn with_transport(name: &str, transport: Box<dyn RpcTransport>) -> Self {
        Self {
            log_target: format!("Rpc[{}]", name),
            transport,
        }
    }

    fn login(&self, request: FetchRequest<'_>, database: &str) -> Result<i64, FetchError> {
        let uid = self
            .transport
            .call(
                request.connection,
                "common",
                "login",
                &[
                    Value::from(database),
                    Value::from(request.credentials.login.as_str()),
                    Value::from(request.credentials.secret.as_str()),
                ],
            )
            .map_err(classify)?;
        match uid {
            Value::Int(uid) => Ok(uid),
            // the server answers `false` for unknown users or wrong passwords
            Value::Bool(false) => Err(FetchError::Authentication(format!(
                "login refused for {}",
                request.credentials.login
            ))),
            other => Err(FetchError::Rejected(format!(
                "unexpected login answer: {:?}",
                other
            ))),
        }
    }

    fn search(
        &self,
        request: FetchRequest<'_>,
        database: &str,
        uid: i64,
        model: &str,
    ) -> Result<u32, FetchError> {
        let result = self.transport.call(
            request.connection,
            "object",
            "execute",
            &[
                Value::from(database),
                Value::Int(uid),
                Value::from(request.credentials.secret.as_str()),
                Value::from(model),
                Value::from("search"),
                unread_domain(),
            ],
        );
        match result {
            Ok(ids) => ids.as_array().map(|ids| ids.len() as u32).ok_or_else(|| {
                FetchError::Rejected(format!("search on {} returned {:?}", model, ids))
            }),
            Err(XmlRpcError::Fault { message, .. }) => Err(FetchError::RemoteQuery {
                entity: model.to_owned(),
                reason: message,
            }),
            Err(err) => Err(classify(err)),
        }
    }

    /// Per-entity query failures count as zero, everything else aborts.
    fn count_unread(
        &self,
        request: FetchRequest<'_>,
        database: &str,
        uid: i64,
        model: &str,
    ) -> Result<u32, FetchError> {
        match self.search(request, database, uid, model) {
            Err(err @ FetchError::RemoteQuery { .. }) => {
                warn!(target: &self.log_target, "{}, counting 0", err);
                Ok(0)
            }
            other => other,
        }
    }
}
impl FetchStrategy for RpcStrategy {
    fn shape(&self) -> CountShape {
        CountShape::Pair
    }

    fn fetch(&mut self, request: FetchRequest<'_>) -> Result<Counts, FetchError> {
        let ConnectionParams { host, port, database } = request.connection;
        let database = database.as_deref().ok_or_else(|| {
            FetchError::FatalConfiguration("no database configured".to_owned())
        })?;
        debug!(target: &self.log_target, "Polling {}:{}/{}", host, port, database);

        let uid = self.login(request, database)?;
        let tasks = self.count_unread(request, database, uid, TASK_MODEL)?;
        let issues = self.count_unread(request, database, uid, ISSUE_MODEL)?;
        Ok(Counts::Pair { tasks, issues })
    }
}
