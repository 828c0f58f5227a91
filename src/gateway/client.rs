//! # Gateway Admin API Client
//!
//! Thin wrapper around `reqwest::Client` that knows the admin API base URL, applies the
//! request timeout and attaches the admin token to every request. The schema store and
//! the full-push strategy share one instance.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use url::Url;

use crate::core::config::GatewayConnection;
use crate::core::error::{ReconcileError, ReconcileResult};

/// Header carrying the admin API token
pub const ADMIN_TOKEN_HEADER: &str = "Kong-Admin-Token";

#[derive(Debug, Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
}

impl AdminClient {
    /// Create a client for the admin API described by `connection`
    pub fn new(connection: &GatewayConnection) -> ReconcileResult<Self> {
        Url::parse(&connection.admin_url).map_err(|e| {
            ReconcileError::config(format!("Invalid admin_url '{}': {}", connection.admin_url, e))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &connection.admin_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| ReconcileError::config(format!("Invalid admin token: {}", e)))?;
            headers.insert(ADMIN_TOKEN_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(connection.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: connection.admin_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL of an admin API path
    pub fn endpoint(&self, path: &str) -> ReconcileResult<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw)
            .map_err(|e| ReconcileError::config(format!("Invalid admin endpoint '{}': {}", raw, e)))
    }

    /// Absolute URL built from path segments, each percent-encoded on its own so a
    /// segment can never contain `/`, `?` or `#`
    pub fn endpoint_segments(&self, segments: &[&str]) -> ReconcileResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ReconcileError::config(format!("Invalid admin_url '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ReconcileError::config(format!("admin_url '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Start a request against an admin API path
    pub fn request(&self, method: Method, path: &str) -> ReconcileResult<RequestBuilder> {
        Ok(self.http.request(method, self.endpoint(path)?))
    }

    pub fn request_segments(&self, method: Method, segments: &[&str]) -> ReconcileResult<RequestBuilder> {
        Ok(self.http.request(method, self.endpoint_segments(segments)?))
    }
}
