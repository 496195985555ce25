//! Authenticated, retrying access to the RomM catalog API

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::model::{CatalogRecord, Collection, Platform};
use crate::error::{Error, Result};
use crate::http::{Credentials, HttpRequest, HttpTransport, RetryPolicy};

/// Timeout for small metadata calls (auth probe, platforms, collections)
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single platform's record listing
pub const PLATFORM_LISTING_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for catalog-wide collection queries
pub const FULL_CATALOG_TIMEOUT: Duration = Duration::from_secs(180);

/// Maximum records requested per listing call
pub const LISTING_LIMIT: u32 = 10_000;

/// Collection name fragments identifying the favorites collection
const FAVORITES_NEEDLES: [&str; 2] = ["favour", "favorite"];
/// Collection name fragment identifying the kid-friendly collection
const KID_FRIENDLY_NEEDLE: &str = "kid";

/// Name shown to the user when the favorites collection is missing
pub const FAVORITES_COLLECTION_NAME: &str = "Favourites";

/// An authenticated connection to one server.
///
/// Holds the credentials and caches the favorites collection lookup for
/// the rest of the run.
#[derive(Debug)]
pub struct Session {
    server_url: String,
    credentials: Credentials,
    favorites_collection: OnceLock<Option<i64>>,
}

impl Session {
    pub(crate) fn new(server_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            server_url: server_url.into(),
            credentials,
            favorites_collection: OnceLock::new(),
        }
    }

    /// Base server URL without trailing slash
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Credentials to attach to server-hosted requests
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// `<server>/api<endpoint>`
    pub fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api{}", self.server_url, endpoint)
    }

    /// Returns `true` if the URL points at this server.
    ///
    /// Scheme, host and port must match exactly and the path must lie
    /// under the server's base path. Unparsable URLs never match.
    pub fn is_server_url(&self, url: &str) -> bool {
        let (Ok(server), Ok(candidate)) = (Url::parse(&self.server_url), Url::parse(url)) else {
            return false;
        };

        let base = server.path().trim_end_matches('/');
        let path = candidate.path();
        let under_base = base.is_empty()
            || path == base
            || path.strip_prefix(base).map_or(false, |rest| rest.starts_with('/'));

        server.scheme() == candidate.scheme()
            && server.host_str() == candidate.host_str()
            && server.port_or_known_default() == candidate.port_or_known_default()
            && under_base
    }

    /// Server-hosted cover for a record
    pub fn cover_url(&self, record_id: i64) -> String {
        self.api_url(&format!("/roms/{}/cover/small", record_id))
    }

    /// Binary download endpoint for a record
    pub fn download_url(&self, record_id: i64) -> String {
        self.api_url(&format!("/roms/{}/content/download", record_id))
    }
}

/// Record listings come back either bare or paginated
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordPage {
    Paged {
        items: Vec<Value>,
        #[serde(default)]
        total: Option<u64>,
    },
    List(Vec<Value>),
}

impl RecordPage {
    fn into_items(self) -> Vec<Value> {
        match self {
            Self::Paged { items, total } => {
                tracing::debug!("Listing returned {} records (total: {:?})", items.len(), total);
                items
            }
            Self::List(items) => items,
        }
    }
}

/// Client for the remote catalog
pub struct CatalogClient {
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl CatalogClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::listing(),
        }
    }

    /// Override the retry policy used for listing calls
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Verify credentials against the server.
    ///
    /// Any failure here is an [`Error::Authentication`]; nothing is retried.
    pub fn authenticate(&self, server_url: &str, user: &str, secret: &str) -> Result<Session> {
        let server_url = server_url.trim().trim_end_matches('/').to_string();
        if server_url.is_empty() {
            return Err(Error::Config("Server URL is empty".to_string()));
        }

        if Url::parse(&server_url).is_err() {
            return Err(Error::Config(format!("Invalid server URL '{}'", server_url)));
        }

        let session = Session::new(server_url, Credentials::new(user, secret));

        let request = HttpRequest::get(session.api_url("/users/me"), METADATA_TIMEOUT)
            .with_credentials(session.credentials.clone());

        match self.transport.get(&request) {
            Ok(response) if response.is_success() => {
                tracing::info!("Authenticated to {} as {}", session.server_url, user);
                Ok(session)
            }
            Ok(response) if matches!(response.status, 401 | 403) => Err(Error::Authentication(
                format!("invalid credentials for user '{}'", user),
            )),
            Ok(response) => Err(Error::Authentication(format!(
                "server responded with HTTP {}",
                response.status
            ))),
            Err(e) => Err(Error::Authentication(format!(
                "could not reach {}: {}",
                session.server_url, e
            ))),
        }
    }

    /// List all platforms on the server
    pub fn list_platforms(&self, session: &Session) -> Result<Vec<Platform>> {
        self.get_json(session, self.request(session, "/platforms", METADATA_TIMEOUT))
    }

    /// List all collections visible to the user
    pub fn list_collections(&self, session: &Session) -> Result<Vec<Collection>> {
        self.get_json(session, self.request(session, "/collections", METADATA_TIMEOUT))
    }

    /// Find the first collection whose name contains any of `needles`
    pub fn find_collection(&self, session: &Session, needles: &[&str]) -> Result<Option<Collection>> {
        let collections = self.list_collections(session)?;
        Ok(collections
            .into_iter()
            .find(|c| needles.iter().any(|n| c.name_contains(n))))
    }

    /// Id of the favorites collection, looked up once per session.
    ///
    /// A missing collection is [`Error::CollectionNotFound`], never an
    /// empty favorites set.
    pub fn favorites_collection_id(&self, session: &Session) -> Result<i64> {
        let cached = match session.favorites_collection.get() {
            Some(cached) => *cached,
            None => {
                let found = self
                    .find_collection(session, &FAVORITES_NEEDLES)?
                    .map(|c| {
                        tracing::debug!("Using favorites collection '{}' (id {})", c.name, c.id);
                        c.id
                    });
                let _ = session.favorites_collection.set(found);
                found
            }
        };

        cached.ok_or_else(|| Error::CollectionNotFound {
            name: FAVORITES_COLLECTION_NAME.to_string(),
        })
    }

    /// List the records of one platform, optionally restricted to favorites.
    ///
    /// A 404 from the listing endpoint yields an empty list. Malformed
    /// records are skipped individually.
    pub fn list_records(
        &self,
        session: &Session,
        platform: &Platform,
        favorites_only: bool,
    ) -> Result<Vec<CatalogRecord>> {
        let mut request = self
            .request(session, "/roms", PLATFORM_LISTING_TIMEOUT)
            .query("platform_id", platform.id)
            .query("limit", LISTING_LIMIT);

        if favorites_only {
            let collection_id = self.favorites_collection_id(session)?;
            request = request.query("collection_id", collection_id);
        }

        let items = match self.get_json::<RecordPage>(session, request) {
            Ok(page) => page.into_items(),
            Err(e) if e.is_not_found() => {
                tracing::debug!("No records listed for {}", platform.slug);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match CatalogRecord::from_value(item, &platform.slug, favorites_only) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping record on {}: {}", platform.slug, e),
            }
        }

        Ok(records)
    }

    /// Ids of every record in a collection (catalog-wide query)
    pub fn list_collection_record_ids(
        &self,
        session: &Session,
        collection_id: i64,
    ) -> Result<HashSet<i64>> {
        let request = self
            .request(session, "/roms", FULL_CATALOG_TIMEOUT)
            .query("collection_id", collection_id)
            .query("limit", LISTING_LIMIT);

        let items = match self.get_json::<RecordPage>(session, request) {
            Ok(page) => page.into_items(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_i64))
            .collect())
    }

    /// Ids of records in the kid-friendly collection; empty if there is none
    pub fn kid_friendly_ids(&self, session: &Session) -> Result<HashSet<i64>> {
        match self.find_collection(session, &[KID_FRIENDLY_NEEDLE])? {
            Some(collection) => {
                let ids = self.list_collection_record_ids(session, collection.id)?;
                tracing::info!(
                    "Kid-friendly collection '{}' has {} record(s)",
                    collection.name,
                    ids.len()
                );
                Ok(ids)
            }
            None => {
                tracing::debug!("No kid-friendly collection on server");
                Ok(HashSet::new())
            }
        }
    }

    fn request(&self, session: &Session, endpoint: &str, timeout: Duration) -> HttpRequest {
        HttpRequest::get(session.api_url(endpoint), timeout)
            .with_credentials(session.credentials.clone())
    }

    fn get_json<T: DeserializeOwned>(&self, session: &Session, request: HttpRequest) -> Result<T> {
        tracing::debug!("GET {} ({})", request.display_url(), session.server_url);
        let response = self.retry.send(self.transport.as_ref(), &request)?;
        let body = response.bytes()?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::Other(format!(
                "Unexpected response from {}: {}",
                request.display_url(),
                e
            ))
        })
    }
}
