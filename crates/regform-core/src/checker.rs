use std::sync::Arc;

use reqwest::{Client, StatusCode, Url};

use crate::error::LookupError;
use crate::lookup_cache::{Flight, LookupCache};

/// Default endpoint used for the favorite-pokemon existence check.
pub const DEFAULT_LOOKUP_URL: &str = "https://pokeapi.co/api/v2/pokemon/";

/// Transport that answers "does this value exist remotely?".
///
/// `Ok(false)` is a definite not-found; `Err` is a failure to find out.
/// Callers treat both the same way, but transports keep them apart for logs.
#[async_trait::async_trait]
pub trait ExistenceLookup: Send + Sync {
    fn id(&self) -> &'static str;

    async fn exists(&self, value: &str) -> Result<bool, LookupError>;
}

/// Looks a value up by appending it as a path segment to a base URL.
///
/// Any 2xx response means the resource exists. No body is sent and the
/// client's default timeout applies.
pub struct HttpLookup {
    client: Client,
    base_url: Url,
}

impl HttpLookup {
    pub fn new(base_url: &str) -> Result<Self, LookupError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, LookupError> {
        let base_url =
            Url::parse(base_url).map_err(|err| LookupError::InvalidUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::InvalidUrl(format!(
                "{} cannot be used as a base",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    /// URL queried for `value`; the value is percent-encoded as one segment.
    pub fn url_for(&self, value: &str) -> Result<Url, LookupError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(value);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ExistenceLookup for HttpLookup {
    fn id(&self) -> &'static str {
        "http"
    }

    async fn exists(&self, value: &str) -> Result<bool, LookupError> {
        let url = self.url_for(value)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| LookupError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(LookupError::Status(status.as_u16()))
        }
    }
}

/// Memoizing, single-flight existence check.
///
/// At most one lookup per distinct value is outstanding at a time and each
/// value is looked up at most once per cache lifetime. Failures are recorded
/// as "does not exist" and never retried.
#[derive(Clone)]
pub struct RemoteExistenceChecker {
    cache: Arc<LookupCache>,
    lookup: Arc<dyn ExistenceLookup>,
}

impl RemoteExistenceChecker {
    pub fn new(cache: Arc<LookupCache>, lookup: Arc<dyn ExistenceLookup>) -> Self {
        Self { cache, lookup }
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    pub async fn check_exists(&self, value: &str) -> bool {
        if value.trim().is_empty() {
            return false;
        }
        loop {
            match self.cache.begin(value) {
                Flight::Cached(exists) => {
                    tracing::debug!(value, exists, "existence cache hit");
                    return exists;
                }
                Flight::Follower(waiter) => {
                    tracing::debug!(value, "joining in-flight existence lookup");
                    if let Some(exists) = waiter.wait().await {
                        return exists;
                    }
                }
                Flight::Leader(ticket) => {
                    let exists = match self.lookup.exists(value).await {
                        Ok(exists) => exists,
                        Err(err) => {
                            tracing::debug!(
                                value,
                                lookup = self.lookup.id(),
                                error = %err,
                                "existence lookup failed; treating as not found"
                            );
                            false
                        }
                    };
                    ticket.complete(exists);
                    return exists;
                }
            }
        }
    }
}
