//! Tool JWKS retrieval with HTTP caching semantics.
//!
//! Entries revalidate with `If-None-Match` / `If-Modified-Since` once their
//! freshness lifetime passes, and may be served stale for a bounded grace
//! window when the origin is unreachable. The map is guarded by a
//! reader/writer lock; the fresh-hit path takes only a read lock, and no
//! lock is held across network I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use reqwest::header;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LecternError, Result};

/// Response bodies larger than this are rejected.
const MAX_JWKS_BODY: usize = 1 << 20;

#[derive(Clone)]
struct CacheEntry {
    set: Arc<JwkSet>,
    expiry: DateTime<Utc>,
    allow_stale_until: DateTime<Utc>,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// Process-wide cache mapping JWKS URL to parsed key set.
pub struct JwksCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    client: reqwest::Client,
    default_ttl: Duration,
    stale_grace: Duration,
}

impl JwksCache {
    /// Create a cache with explicit freshness defaults. `default_ttl`
    /// applies when the response carries no caching directives;
    /// `stale_grace` bounds how long stale content may serve on fetch
    /// failure.
    pub fn new(default_ttl: Duration, stale_grace: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            client: reqwest::Client::builder()
                .timeout(StdDuration::from_secs(5))
                .build()
                .unwrap_or_default(),
            default_ttl,
            stale_grace,
        }
    }

    /// Drop the entry for `url`, forcing the next `get` to fetch.
    pub async fn invalidate(&self, url: &str) {
        self.entries.write().await.remove(url);
    }

    /// Return the key set for `url`, fetching or revalidating as needed.
    pub async fn get(&self, url: &str) -> Result<Arc<JwkSet>> {
        if let Some(set) = self.get_fresh(url).await {
            return Ok(set);
        }
        self.fetch(url).await
    }

    async fn get_fresh(&self, url: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.read().await;
        let entry = entries.get(url)?;
        if Utc::now() < entry.expiry {
            return Some(Arc::clone(&entry.set));
        }
        None
    }

    async fn fetch(&self, url: &str) -> Result<Arc<JwkSet>> {
        // Snapshot revalidation metadata without holding the lock across I/O.
        let cached = self.entries.read().await.get(url).cloned();

        let mut req = self.client.get(url);
        if let Some(entry) = &cached {
            if let Some(etag) = &entry.etag {
                req = req.header(header::IF_NONE_MATCH, etag);
            }
            if let Some(lm) = &entry.last_modified {
                req = req.header(header::IF_MODIFIED_SINCE, lm);
            }
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                if let Some(entry) = serve_stale(&cached) {
                    debug!(url, error = %e, "JWKS fetch failed, serving stale");
                    return Ok(entry);
                }
                return Err(e.into());
            }
        };

        match resp.status().as_u16() {
            304 => {
                let Some(entry) = cached else {
                    return Err(LecternError::JwksCache(
                        "304 response without a cached entry".into(),
                    ));
                };
                let (expiry, allow_stale_until) =
                    compute_expiry(resp.headers(), self.default_ttl, self.stale_grace);
                let mut entries = self.entries.write().await;
                if let Some(stored) = entries.get_mut(url) {
                    stored.expiry = expiry;
                    stored.allow_stale_until = allow_stale_until;
                }
                Ok(entry.set)
            }
            200 => {
                let etag = header_string(resp.headers(), header::ETAG);
                let last_modified = header_string(resp.headers(), header::LAST_MODIFIED);
                let (expiry, allow_stale_until) =
                    compute_expiry(resp.headers(), self.default_ttl, self.stale_grace);

                let body = read_capped(resp).await?;
                let set: JwkSet = serde_json::from_slice(&body)
                    .map_err(|e| LecternError::JwksCache(format!("invalid JWKS: {e}")))?;
                let set = Arc::new(set);

                let entry = CacheEntry {
                    set: Arc::clone(&set),
                    expiry,
                    allow_stale_until,
                    etag,
                    last_modified,
                };
                self.entries.write().await.insert(url.to_string(), entry);
                Ok(set)
            }
            status => {
                if let Some(entry) = serve_stale(&cached) {
                    debug!(url, status, "JWKS origin error, serving stale");
                    return Ok(entry);
                }
                Err(LecternError::JwksCache(format!(
                    "unexpected status {status} from {url}"
                )))
            }
        }
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new(Duration::minutes(10), Duration::hours(1))
    }
}

fn serve_stale(cached: &Option<CacheEntry>) -> Option<Arc<JwkSet>> {
    let entry = cached.as_ref()?;
    if Utc::now() < entry.allow_stale_until {
        return Some(Arc::clone(&entry.set));
    }
    None
}

async fn read_capped(mut resp: reqwest::Response) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > MAX_JWKS_BODY {
            return Err(LecternError::JwksCache("JWKS body exceeds 1 MiB".into()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn header_string(headers: &header::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Derive freshness bounds from response caching headers.
/// `Cache-Control: no-store` yields an immediately expired, never-stale
/// entry; `max-age` wins over `Expires`; otherwise the default TTL applies.
fn compute_expiry(
    headers: &header::HeaderMap,
    default_ttl: Duration,
    stale_grace: Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let cache_control = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let directives = parse_cache_control(cache_control);

    if directives.no_store {
        return (now, now);
    }
    if let Some(secs) = directives.max_age {
        let expiry = now + Duration::seconds(secs);
        return (expiry, expiry + stale_grace);
    }
    if let Some(expires) = headers.get(header::EXPIRES).and_then(|v| v.to_str().ok()) {
        if let Ok(parsed) = DateTime::parse_from_rfc2822(expires) {
            let expiry = parsed.with_timezone(&Utc);
            return (expiry, expiry + stale_grace);
        }
    }
    let expiry = now + default_ttl;
    (expiry, expiry + stale_grace)
}

#[derive(Default)]
struct CacheControl {
    no_store: bool,
    max_age: Option<i64>,
}

fn parse_cache_control(value: &str) -> CacheControl {
    let mut out = CacheControl::default();
    for part in value.split(',') {
        let part = part.trim().to_ascii_lowercase();
        if part == "no-store" {
            out.no_store = true;
        } else if let Some(age) = part.strip_prefix("max-age=") {
            out.max_age = age.parse().ok();
        }
    }
    out
}
