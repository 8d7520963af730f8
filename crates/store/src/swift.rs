//! OpenStack Swift client
//!
//! Authenticates against Keystone v3 (or uses a pre-issued token), lists
//! containers page by page and streams file bodies up. Files larger than the
//! configured segment size become static large objects: the segments go to
//! `<container>_segments` and a JSON manifest is written under the real name.

use crate::config::SwiftConfig;
use crate::error::{Result, StoreError};
use crate::{ObjectBody, ObjectStore};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::{Body, Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const LIST_PAGE_LIMIT: usize = 10_000;

/// Token plus the storage endpoint it is valid for
#[derive(Debug, Clone)]
struct Session {
    storage_url: Url,
    token: String,
}

/// Swift-backed [`ObjectStore`]
pub struct SwiftStore {
    http: Client,
    config: SwiftConfig,
    session: Mutex<Option<Session>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Serialize)]
struct ManifestSegment {
    path: String,
    etag: Option<String>,
    size_bytes: u64,
}

impl SwiftStore {
    pub fn new(config: SwiftConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("snapvault/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Replace `stale` with a fresh session, unless someone already did
    async fn renew(&self, stale: &Session) -> Result<Session> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            if session.token != stale.token {
                return Ok(session.clone());
            }
        }
        let session = self.authenticate().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Run `op` with the cached session, authenticating once more if the
    /// token was rejected on the way
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.session().await?;
        match op(session.clone()).await {
            Err(StoreError::TokenRejected(reason)) if self.config.auth.can_renew() => {
                warn!("Swift token rejected ({}), authenticating again", reason);
                let session = self.renew(&session).await?;
                op(session).await
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<Session> {
        use crate::config::SwiftAuth;

        match &self.config.auth {
            SwiftAuth::Preauthenticated { storage_url, token } => Ok(Session {
                storage_url: parse_url(storage_url)?,
                token: token.clone(),
            }),
            SwiftAuth::Keystone {
                auth_url,
                username,
                password,
                project_name,
                user_domain_name,
                project_domain_name,
            } => {
                let url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'));
                let body = json!({
                    "auth": {
                        "identity": {
                            "methods": ["password"],
                            "password": {
                                "user": {
                                    "name": username,
                                    "domain": { "name": user_domain_name },
                                    "password": password,
                                }
                            }
                        },
                        "scope": {
                            "project": {
                                "name": project_name,
                                "domain": { "name": project_domain_name },
                            }
                        }
                    }
                });

                let response = self.http.post(&url).json(&body).send().await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(StoreError::Auth(format!("Keystone returned {}: {}", status, text)));
                }

                let token = response
                    .headers()
                    .get(SUBJECT_TOKEN_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::Auth("Keystone response carries no token".to_string()))?;
                let parsed: TokenResponse = response.json().await?;
                let endpoint = select_endpoint(
                    &parsed.token.catalog,
                    &self.config.interface,
                    self.config.region.as_deref(),
                )?;
                info!("Authenticated against Keystone, storage endpoint {}", endpoint);

                Ok(Session {
                    storage_url: parse_url(endpoint)?,
                    token,
                })
            }
        }
    }

    async fn ensure_container(&self, session: &Session, container: &str) -> Result<()> {
        let url = object_url(&session.storage_url, &[container])?;
        let response = self
            .http
            .put(url.clone())
            .header(AUTH_TOKEN_HEADER, &session.token)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;
        check(response, "PUT", &url).await.map(|_| ())
    }

    /// Stream `len` bytes of `path` starting at `offset` into a single object
    async fn put_range(
        &self,
        session: &Session,
        url: Url,
        path: &Path,
        offset: u64,
        len: u64,
    ) -> Result<Option<String>> {
        let mut file = tokio::fs::File::open(path).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        let stream = ReaderStream::new(file.take(len));

        let response = self
            .http
            .put(url.clone())
            .header(AUTH_TOKEN_HEADER, &session.token)
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;
        let response = check(response, "PUT", &url).await?;

        Ok(response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_string()))
    }

    /// One listing page after `marker`; `None` once the server has nothing more
    async fn list_page(
        &self,
        session: &Session,
        container: &str,
        prefix: Option<&str>,
        marker: Option<String>,
    ) -> Result<Option<Vec<String>>> {
        let url = object_url(&session.storage_url, &[container])?;
        let mut request = self
            .http
            .get(url.clone())
            .header(AUTH_TOKEN_HEADER, &session.token)
            .query(&[("format", "json")])
            .query(&[("limit", LIST_PAGE_LIMIT)]);
        if let Some(prefix) = prefix {
            request = request.query(&[("prefix", prefix)]);
        }
        if let Some(marker) = &marker {
            request = request.query(&[("marker", marker)]);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        let response = check(response, "GET", &url).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let page: Vec<ListedObject> = response.json().await?;
        Ok(Some(page.into_iter().map(|object| object.name).collect()))
    }

    #[instrument(skip(self, session, body), fields(size = body.len()))]
    async fn put_segmented(
        &self,
        session: &Session,
        container: &str,
        name: &str,
        body: &ObjectBody,
    ) -> Result<()> {
        let segment_size = self.config.segment_size_bytes;
        let segment_container = format!("{}_segments", container);
        self.ensure_container(session, &segment_container).await?;

        let total = body.len().div_ceil(segment_size);
        let mut manifest = Vec::with_capacity(total as usize);
        for index in 0..total {
            let offset = index * segment_size;
            let len = segment_size.min(body.len() - offset);
            let segment_name = segment_name(name, index);
            let url = object_url(&session.storage_url, &[&segment_container, &segment_name])?;

            debug!("Uploading segment {}/{} ({} bytes)", index + 1, total, len);
            let etag = self.put_range(session, url, body.path(), offset, len).await?;
            manifest.push(ManifestSegment {
                path: format!("/{}/{}", segment_container, segment_name),
                etag,
                size_bytes: len,
            });
        }

        let mut url = object_url(&session.storage_url, &[container, name])?;
        url.query_pairs_mut().append_pair("multipart-manifest", "put");
        let response = self
            .http
            .put(url.clone())
            .header(AUTH_TOKEN_HEADER, &session.token)
            .body(serde_json::to_vec(&manifest)?)
            .send()
            .await?;
        check(response, "PUT", &url).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SwiftStore {
    #[instrument(skip(self))]
    async fn list(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let names = self
            .with_session(|session| async move {
                collect_pages(|marker| self.list_page(&session, container, prefix, marker)).await
            })
            .await?;

        debug!("Listed {} objects in {}", names.len(), container);
        Ok(names)
    }

    #[instrument(skip(self, body), fields(size = body.len()))]
    async fn put_object(&self, container: &str, name: &str, body: ObjectBody) -> Result<()> {
        let body = &body;
        self.with_session(|session| async move {
            if body.len() > self.config.segment_size_bytes {
                return self.put_segmented(&session, container, name, body).await;
            }

            let url = object_url(&session.storage_url, &[container, name])?;
            self.put_range(&session, url, body.path(), 0, body.len())
                .await?;
            Ok(())
        })
        .await
    }
}

/// Follow listing pages by marker until an empty page
///
/// A page shorter than the requested limit is not the end: clusters cap
/// pages at their own `container_listing_limit`.
async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Option<Vec<String>>>>,
{
    let mut names: Vec<String> = Vec::new();
    loop {
        let marker = names.last().cloned();
        match fetch(marker).await? {
            Some(page) if !page.is_empty() => names.extend(page),
            _ => return Ok(names),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| StoreError::Config(format!("invalid URL {:?}: {}", raw, e)))
}

/// Append percent-encoded path segments to the storage URL
fn object_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::Config(format!("storage URL {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn segment_name(name: &str, index: u64) -> String {
    format!("{}/{:08}", name, index + 1)
}

fn select_endpoint<'a>(
    catalog: &'a [CatalogEntry],
    interface: &str,
    region: Option<&str>,
) -> Result<&'a str> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == "object-store")
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == interface
                && region.map_or(true, |region| {
                    endpoint.region.as_deref() == Some(region) || endpoint.region_id.as_deref() == Some(region)
                })
        })
        .map(|endpoint| endpoint.url.as_str())
        .ok_or_else(|| {
            StoreError::Auth(format!(
                "no {} object-store endpoint{} in the service catalog",
                interface,
                region.map(|r| format!(" for region {}", r)).unwrap_or_default()
            ))
        })
}

async fn check(response: Response, method: &'static str, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(StoreError::TokenRejected(format!("{} {} returned {}", method, url.path(), status)));
    }
    if status == StatusCode::FORBIDDEN {
        return Err(StoreError::Auth(format!("{} {} returned {}", method, url.path(), status)));
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        method,
        url: url.path().to_string(),
        status: status.as_u16(),
        body,
    })
}
