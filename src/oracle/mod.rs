//! Coordinate client (C4) — the contract against the external Library of
//! Babel oracle.
//!
//! # Interface
//! [`OracleClient`] exposes `search` (page-text → coordinate) and `fetch`
//! (coordinate → page-text). The production implementation,
//! [`HttpOracleClient`], talks to the oracle over HTTPS with `reqwest` and
//! `tokio`; tests substitute [`FakeOracleClient`], an in-memory
//! deterministic stand-in, so the chunker and orchestrator can be exercised
//! without any network access.
//!
//! # Retry policy
//! Up to `max_attempts` (default 5) attempts per call, exponential backoff
//! starting at 1s and capped at 60s. Transport errors and 5xx responses are
//! retried; 4xx responses are not (the oracle will not change its mind).
//!
//! # Endianness / validation
//! `search` rejects any input whose length is not exactly [`PAGE_SIZE`] or
//! that contains a non-alphabet symbol. `fetch` rejects coordinates whose
//! fields violate the domain constraints in the data model.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alphabet::{self, PAGE_SIZE};
use crate::error::BabelError;

/// The 5-tuple address of a page within the oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub hexagon: String,
    pub wall: u8,
    pub shelf: u8,
    pub volume: u8,
    pub page: u16,
}

impl Coordinate {
    pub fn validate(&self) -> Result<(), BabelError> {
        if !(1..=4).contains(&self.wall) {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("wall {} outside [1,4]", self.wall),
            });
        }
        if !(1..=5).contains(&self.shelf) {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("shelf {} outside [1,5]", self.shelf),
            });
        }
        if !(1..=32).contains(&self.volume) {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("volume {} outside [1,32]", self.volume),
            });
        }
        if !(1..=410).contains(&self.page) {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("page {} outside [1,410]", self.page),
            });
        }
        if self.hexagon.is_empty() {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: "empty hexagon identifier".into(),
            });
        }
        Ok(())
    }
}

/// Configuration for a coordinate client: endpoint, retry budget,
/// per-call timeout, and the bounded concurrency used by the orchestrator
/// when fanning out `search`/`fetch` calls across chunks.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub concurrency: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://libraryofbabel.info".to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            concurrency: 4,
        }
    }
}

/// The coordinate-service contract. Implemented by [`HttpOracleClient`]
/// for production use and [`FakeOracleClient`] for tests.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn search(&self, page_text: &str) -> Result<Coordinate, BabelError>;
    async fn fetch(&self, coordinate: &Coordinate) -> Result<String, BabelError>;

    /// Upper bound on concurrent `search`/`fetch` calls the orchestrator
    /// should schedule against this client at once. Default matches
    /// [`OracleConfig::default`]'s `concurrency`.
    fn concurrency(&self) -> usize {
        4
    }
}

// ── HTTP implementation ───────────────────────────────────────────────────

pub struct HttpOracleClient {
    http: reqwest::Client,
    config: OracleConfig,
}

impl HttpOracleClient {
    pub fn new(config: OracleConfig) -> Result<Self, BabelError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("babelstorage/0.5")
            .build()
            .map_err(|e| BabelError::OracleUnavailable {
                index: None,
                attempts: 0,
                source: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    /// Run `op` up to `max_attempts` times with exponential backoff,
    /// retrying transport errors and 5xx responses. 4xx responses and
    /// parse errors are surfaced immediately without retry.
    async fn with_retry<T, F, Fut>(&self, chunk_index: Option<usize>, mut op: F) -> Result<T, BabelError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AttemptError>>,
    {
        let mut backoff = self.config.initial_backoff;
        let mut last_err = String::new();

        for attempt in 1..=self.config.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::NotRetryable(msg)) => {
                    return Err(BabelError::OracleProtocolError { index: chunk_index, message: msg });
                }
                Err(AttemptError::Retryable(msg)) => {
                    warn!(attempt, chunk = ?chunk_index, %msg, "oracle call failed, retrying");
                    last_err = msg;
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.max_backoff);
                    }
                }
            }
        }

        Err(BabelError::OracleUnavailable {
            index: chunk_index,
            attempts: self.config.max_attempts,
            source: last_err,
        })
    }
}

enum AttemptError {
    Retryable(String),
    NotRetryable(String),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        AttemptError::Retryable(e.to_string())
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn search(&self, page_text: &str) -> Result<Coordinate, BabelError> {
        if page_text.len() != PAGE_SIZE {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("page_text length {} != {PAGE_SIZE}", page_text.len()),
            });
        }
        alphabet::validate_alphabet(page_text.as_bytes())?;

        let url = format!("{}/search", self.config.base_url);
        let form = [("content", page_text)];

        self.with_retry(None, || async {
            let resp = self.http.post(&url).form(&form).send().await?;
            classify_status(&resp)?;
            let body = resp.text().await?;
            parse_coordinate_from_html(&body)
                .map_err(AttemptError::NotRetryable)
        })
        .await
    }

    async fn fetch(&self, coordinate: &Coordinate) -> Result<String, BabelError> {
        coordinate.validate()?;

        let url = format!("{}/browse", self.config.base_url);
        let query = [
            ("hexagon", coordinate.hexagon.as_str()),
            ("wall", &coordinate.wall.to_string()),
            ("shelf", &coordinate.shelf.to_string()),
            ("volume", &coordinate.volume.to_string()),
            ("page", &coordinate.page.to_string()),
        ];

        self.with_retry(None, || async {
            let resp = self.http.get(&url).query(&query).send().await?;
            classify_status(&resp)?;
            let body = resp.text().await?;
            parse_page_from_html(&body)
                .map_err(AttemptError::NotRetryable)
        })
        .await
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency
    }
}

fn classify_status(resp: &reqwest::Response) -> Result<(), AttemptError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(AttemptError::Retryable(format!("server error {status}")))
    } else {
        Err(AttemptError::NotRetryable(format!("client error {status}")))
    }
}

/// Extract `hexagon:…,wall:…,shelf:…,volume:…,page:…` from the oracle's
/// search response HTML. Defensive: tolerates unrelated markup, fails only
/// on a missing/malformed field.
fn parse_coordinate_from_html(body: &str) -> Result<Coordinate, String> {
    let marker = body
        .find("hexagon:")
        .ok_or_else(|| "search response missing coordinate marker".to_string())?;
    let tail = &body[marker..];
    let line_end = tail.find(['<', '\n']).unwrap_or(tail.len());
    let fields = &tail[..line_end];

    let mut hexagon = None;
    let mut wall = None;
    let mut shelf = None;
    let mut volume = None;
    let mut page = None;

    for part in fields.split(',') {
        let (key, value) = part.split_once(':').ok_or_else(|| format!("malformed field {part:?}"))?;
        let value = value.trim();
        match key.trim() {
            "hexagon" => hexagon = Some(value.to_string()),
            "wall" => wall = Some(value.parse::<u8>().map_err(|e| e.to_string())?),
            "shelf" => shelf = Some(value.parse::<u8>().map_err(|e| e.to_string())?),
            "volume" => volume = Some(value.parse::<u8>().map_err(|e| e.to_string())?),
            "page" => page = Some(value.parse::<u16>().map_err(|e| e.to_string())?),
            _ => {}
        }
    }

    let coord = Coordinate {
        hexagon: hexagon.ok_or("missing hexagon field")?,
        wall: wall.ok_or("missing wall field")?,
        shelf: shelf.ok_or("missing shelf field")?,
        volume: volume.ok_or("missing volume field")?,
        page: page.ok_or("missing page field")?,
    };
    coord.validate().map_err(|e| e.to_string())?;
    Ok(coord)
}

/// Extract the 3200-character page body from the oracle's browse response
/// HTML. The body is expected inside a `<pre id="textblock">…</pre>`
/// element, tolerating attribute-order or whitespace differences.
fn parse_page_from_html(body: &str) -> Result<String, String> {
    let start_tag = body
        .find("id=\"textblock\"")
        .ok_or_else(|| "browse response missing textblock element".to_string())?;
    let content_start = body[start_tag..]
        .find('>')
        .map(|i| start_tag + i + 1)
        .ok_or("malformed textblock element")?;
    let content_end = body[content_start..]
        .find("</pre>")
        .map(|i| content_start + i)
        .ok_or("unterminated textblock element")?;

    let text = body[content_start..content_end].trim();
    if text.len() != PAGE_SIZE {
        return Err(format!("page body length {} != {PAGE_SIZE}", text.len()));
    }
    alphabet::validate_alphabet(text.as_bytes()).map_err(|e| e.to_string())?;

    debug!(len = text.len(), "fetched page body");
    Ok(text.to_string())
}

// ── In-memory fake (tests only) ───────────────────────────────────────────

/// A deterministic in-memory stand-in for the oracle: `search` derives a
/// coordinate from the SHA-256 of the page-text, `fetch` is its inverse
/// lookup. No network, no nondeterminism — used by the chunker/orchestrator
/// test suites.
#[derive(Default)]
pub struct FakeOracleClient {
    store: std::sync::Mutex<std::collections::HashMap<Coordinate, String>>,
}

#[async_trait]
impl OracleClient for FakeOracleClient {
    async fn search(&self, page_text: &str) -> Result<Coordinate, BabelError> {
        if page_text.len() != PAGE_SIZE {
            return Err(BabelError::OracleProtocolError {
                index: None,
                message: format!("page_text length {} != {PAGE_SIZE}", page_text.len()),
            });
        }
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(page_text.as_bytes());
        let coord = Coordinate {
            hexagon: hex::encode(&digest[0..8]),
            wall: 1 + (digest[8] % 4),
            shelf: 1 + (digest[9] % 5),
            volume: 1 + (digest[10] % 32),
            page: 1 + (u16::from(digest[11]) | (u16::from(digest[12]) << 8)) % 410,
        };
        self.store.lock().unwrap().insert(coord.clone(), page_text.to_string());
        Ok(coord)
    }

    async fn fetch(&self, coordinate: &Coordinate) -> Result<String, BabelError> {
        coordinate.validate()?;
        self.store
            .lock()
            .unwrap()
            .get(coordinate)
            .cloned()
            .ok_or_else(|| BabelError::OracleProtocolError {
                index: None,
                message: "unknown coordinate".to_string(),
            })
    }
}
