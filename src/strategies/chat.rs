use super::{CountShape, Counts, FetchError, FetchRequest, FetchStrategy};
use log::{debug, error, info};
use reqwest::Url;
use serde_json::Value;
use std::{thread, time::Duration};

pub const DEFAULT_API_URL: &str = "https://slack.com/api/";
/// Upper bound of history requests in flight at once.
const MAX_PARALLEL_REQUESTS: usize = 16;

/// A listable collection of conversations and the key its items are listed under.
struct Collection {
    list_method: &'static str,
    key: &'static str,
    history_prefix: &'static str,
}
static COLLECTIONS: [Collection; 2] = [
    Collection {
        list_method: "channels.list",
        key: "channels",
        history_prefix: "channels",
    },
    Collection {
        list_method: "im.list",
        key: "ims",
        history_prefix: "im",
    },
];

fn add_counts(total: u32, count: u32) -> Result<u32, FetchError> {
    total
        .checked_add(count)
        .ok_or_else(|| FetchError::Unclassified("unread count overflow".to_owned()))
}

/// Seam between the chat strategy and HTTP.
pub trait ChatTransport: Send + Sync {
    fn get_json(&self, url: &Url) -> Result<Value, String>;
}

pub struct HttpChatTransport {
    http: reqwest::blocking::Client,
}
impl HttpChatTransport {
    pub fn new() -> reqwest::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http })
    }
}
impl ChatTransport for HttpChatTransport {
    fn get_json(&self, url: &Url) -> Result<Value, String> {
        self.http
            .get(url.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| e.to_string())
    }
}

/// Sums the unread counters of every channel and direct conversation.
///
/// Unlike the other strategies every failure here is fatal: a count with
/// conversations silently missing would be wrong, so nothing partial is
/// ever returned.
pub struct ChatStrategy {
    log_target: String,
    base_url: String,
    transport: Box<dyn ChatTransport>,
}
impl ChatStrategy {
    pub fn new(name: &str, base_url: Option<String>) -> reqwest::Result<Self> {
        Ok(Self::with_transport(
            name,
            base_url,
            Box::new(HttpChatTransport::new()?),
        ))
    }

    pub fn with_transport(
        name: &str,
        base_url: Option<String>,
        transport: Box<dyn ChatTransport>,
    ) -> Self {
        Self {
            log_target: format!("Chat[{}]", name),
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            transport,
        }
    }

    /// `{base}{method}?token={token}` plus any extra query pairs.
    fn url(&self, method: &str, token: &str, query: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .and_then(|base| base.join(method))
            .map_err(|e| {
                FetchError::FatalConfiguration(format!("bad API url {}: {}", self.base_url, e))
            })?;
        url.query_pairs_mut()
            .append_pair("token", token)
            .extend_pairs(query.iter());
        Ok(url)
    }

    fn get(&self, url: &Url) -> Result<Value, FetchError> {
        let response = self
            .transport
            .get_json(url)
            .map_err(|e| FetchError::Unclassified(format!("request to {} failed: {}", url.path(), e)))?;
        if let Some(error) = response.get("error") {
            let error = error.as_str().map(str::to_owned).unwrap_or_else(|| error.to_string());
            return Err(FetchError::Unclassified(error));
        }
        if response.get("ok") == Some(&Value::Bool(false)) {
            return Err(FetchError::Unclassified(format!(
                "{} answered not ok",
                url.path()
            )));
        }
        Ok(response)
    }

    fn item_ids(&self, token: &str, collection: &Collection) -> Result<Vec<String>, FetchError> {
        let response = self.get(&self.url(collection.list_method, token, &[])?)?;
        let items = response
            .get(collection.key)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FetchError::Unclassified(format!(
                    "{} lacks the {} list",
                    collection.list_method, collection.key
                ))
            })?;
        items
            .iter()
            .map(|item| {
                item.get("id")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        FetchError::Unclassified(format!("{} item without id", collection.key))
                    })
            })
            .collect()
    }

    fn item_unread(&self, token: &str, prefix: &str, item_id: &str) -> Result<u32, FetchError> {
        let method = format!("{}.history", prefix);
        let url = self.url(&method, token, &[("channel", item_id), ("unreads", "true")])?;
        let history = self.get(&url)?;
        let count = history
            .get("unread_count_display")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                FetchError::Unclassified(format!("{} without unread count for {}", method, item_id))
            })?;
        u32::try_from(count).map_err(|_| {
            FetchError::Unclassified(format!("{} unread count {} out of range", item_id, count))
        })
    }

    /// One request per item, joined before summing. The first failure wins.
    fn collection_unread(&self, token: &str, collection: &Collection) -> Result<u32, FetchError> {
        let ids = self.item_ids(token, collection)?;
        debug!(
            target: &self.log_target,
            "{} {} to check", ids.len(), collection.key
        );
        let mut total = 0;
        for batch in ids.chunks(MAX_PARALLEL_REQUESTS) {
            let counts: Vec<Result<u32, FetchError>> = thread::scope(|scope| {
                let workers: Vec<_> = batch
                    .iter()
                    .map(|item_id| {
                        scope.spawn(move || {
                            self.item_unread(token, collection.history_prefix, item_id)
                        })
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| {
                        worker.join().unwrap_or_else(|_| {
                            Err(FetchError::Unclassified("history worker panicked".to_owned()))
                        })
                    })
                    .collect()
            });
            for count in counts {
                total = add_counts(total, count?)?;
            }
        }
        Ok(total)
    }

    fn unread(&self, token: &str) -> Result<u32, FetchError> {
        if token.is_empty() {
            return Err(FetchError::FatalConfiguration("Missing token.".to_owned()));
        }
        let mut total = 0;
        for collection in &COLLECTIONS {
            total = add_counts(total, self.collection_unread(token, collection)?)?;
        }
        Ok(total)
    }
}
impl FetchStrategy for ChatStrategy {
    fn shape(&self) -> CountShape {
        CountShape::Single
    }

    fn fetch(&mut self, request: FetchRequest<'_>) -> Result<Counts, FetchError> {
        match self.unread(&request.credentials.login) {
            Ok(total) => {
                if total > 0 {
                    info!(target: &self.log_target, "New messages: {}", total);
                }
                Ok(Counts::Single(total))
            }
            Err(err) => {
                error!(target: &self.log_target, "Error: {}", err);
                Err(err)
            }
        }
    }
}
