//! HTTP implementation of the Atlas API traits.
//!
//! [`AtlasClient`] speaks the versioned Atlas Administration API. Every path
//! segment is percent-encoded so CIDR blocks such as `10.0.0.0/24` survive as
//! a single segment.

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::api::{AccessListScope, ApiError, PageRequest};
use crate::config::AtlasConfig;

mod endpoints;

/// Media type selecting the API version the DTOs are written against.
pub const ATLAS_MEDIA_TYPE: &str = "application/vnd.atlas.2023-01-01+json";

const API_PREFIX: [&str; 3] = ["api", "atlas", "v2"];

/// Errors raised while building an [`AtlasClient`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// The base URL cannot carry path segments.
    #[error("invalid Atlas base URL '{url}': {message}")]
    InvalidBaseUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Atlas client backed by a shared `reqwest` connection pool.
#[derive(Clone, Debug)]
pub struct AtlasClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
}

impl AtlasClient {
    /// Builds a client for `base_url` authenticating with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] when `base_url` is not an
    /// absolute HTTP(S) URL and [`ClientError::Build`] when the TLS backend
    /// cannot be initialised.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let invalid = |message: String| ClientError::InvalidBaseUrl {
            url: base_url.to_owned(),
            message,
        };
        let parsed = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid(String::from("URL cannot carry a path")));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| ClientError::Build(err.to_string()))?;
        Ok(Self {
            http,
            base_url: parsed,
            access_token: access_token.into(),
        })
    }

    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// See [`AtlasClient::new`].
    pub fn from_config(config: &AtlasConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.base_url,
            config.access_token.clone(),
            config.request_timeout(),
        )
    }

    /// Resolves `segments` below `/api/atlas/v2`.
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Transport {
                message: format!("base URL '{}' cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header(ACCEPT, ATLAS_MEDIA_TYPE)
    }

    /// Sends the request and returns the raw body of a successful response.
    async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = request.send().await.map_err(|err| ApiError::Transport {
            message: err.to_string(),
        })?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "atlas response");
        let body = response.bytes().await.map_err(|err| ApiError::Transport {
            message: err.to_string(),
        })?;
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(parse_error(status.as_u16(), &body))
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let body = self.execute(request).await?;
        serde_json::from_slice(&body).map_err(|err| ApiError::Decode {
            message: err.to_string(),
        })
    }

    async fn discard(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.execute(request).await.map(drop)
    }
}

/// Atlas error envelope.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    detail: Option<String>,
    error_code: Option<String>,
    reason: Option<String>,
}

/// Converts a non-success response into an [`ApiError`], keeping the Atlas
/// `errorCode` when the body carries one.
fn parse_error(status: u16, body: &[u8]) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .detail
        .or(parsed.reason)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned());
    ApiError::Status {
        status,
        error_code: parsed.error_code,
        message,
    }
}

fn page_query(page: PageRequest) -> [(&'static str, String); 2] {
    [
        ("pageNum", page.page_num.to_string()),
        ("itemsPerPage", page.items_per_page.to_string()),
    ]
}

fn access_list_segments(scope: &AccessListScope) -> Vec<&str> {
    match scope {
        AccessListScope::Project { project_id } => {
            vec!["groups", project_id.as_str(), "accessList"]
        }
        AccessListScope::ServiceAccount { org_id, client_id } => vec![
            "orgs",
            org_id.as_str(),
            "serviceAccounts",
            client_id.as_str(),
            "accessList",
        ],
    }
}
