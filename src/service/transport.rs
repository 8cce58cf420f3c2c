use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::app::NetworkConfig;
use crate::constants::{GRAPHQL_ACCEPT_HEADER, HTTP_REQUEST_TIMEOUT_SECS};
use crate::graphql::{GraphQlDocument, GraphQlEnvelope};
use crate::identity::DeviceIdentityManager;
use crate::stats::StatisticsCollector;
use crate::utils::NetworkError;

/// Per-call options for the direct transport surface
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub url: String,
    pub method: reqwest::Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Override the internal-API credentials default
    pub include_credentials: Option<bool>,
    /// Caller supplied its own transport target rather than the default
    /// API endpoint; enables server-side internal-origin rewriting
    pub custom_transport: bool,
}

impl RequestOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::GET,
            body: None,
            headers: Vec::new(),
            include_credentials: None,
            custom_transport: false,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::POST,
            body: Some(body),
            headers: Vec::new(),
            include_credentials: None,
            custom_transport: false,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn credentials(mut self, include: bool) -> Self {
        self.include_credentials = Some(include);
        self
    }

    pub fn custom_transport(mut self) -> Self {
        self.custom_transport = true;
        self
    }
}

/// Raw outcome of a successful transport call
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn json(&self) -> Result<Value, NetworkError> {
        serde_json::from_slice(&self.body).map_err(NetworkError::from)
    }
}

/// Thin wrapper around the HTTP client: device identity first, server-side
/// URL rewriting, internal-API classification and statistics recording.
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<NetworkConfig>,
    identity: Arc<DeviceIdentityManager>,
    stats: StatisticsCollector,
}

impl HttpTransport {
    pub fn new(
        config: Arc<NetworkConfig>,
        identity: Arc<DeviceIdentityManager>,
        stats: StatisticsCollector,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            identity,
            stats,
        }
    }

    /// Direct request: identity, rewriting, classification, statistics
    pub async fn request(
        &self,
        options: RequestOptions,
    ) -> Result<TransportResponse, NetworkError> {
        self.identity.ensure().await;

        let url = self.effective_url(&options.url, options.custom_transport);
        let parsed =
            Url::parse(&url).map_err(|e| NetworkError::Config(format!("bad URL {url}: {e}")))?;
        let internal = self.is_internal(&parsed);
        // Credentials default to include only for internal-API calls
        let include_credentials = options.include_credentials.unwrap_or(internal);

        let tracker = self.stats.track_request();

        let mut request = self.client.request(options.method.clone(), parsed);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if include_credentials {
            if let Some(token) = &self.config.api.credentials_token {
                request = request.bearer_auth(token);
            }
        }
        if let Some(body) = &options.body {
            if let Ok(serialized) = serde_json::to_vec(body) {
                self.stats.track_bytes_sent(serialized.len() as u64);
            }
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracker.error();
                return Err(NetworkError::from(e));
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracker.error();
                return Err(NetworkError::from(e));
            }
        };
        self.stats.track_bytes_received(body.len() as u64);

        if (200..300).contains(&status) {
            tracker.success();
            Ok(TransportResponse { status, body })
        } else {
            tracker.error();
            Err(NetworkError::Transport {
                status,
                message: String::from_utf8_lossy(&body).chars().take(200).collect(),
            })
        }
    }

    /// GraphQL request: POST `{query, variables}`, parse the envelope, and
    /// distinguish transport failure, GraphQL errors and success
    pub async fn graphql(
        &self,
        document: &GraphQlDocument,
        variables: Value,
    ) -> Result<Value, NetworkError> {
        let body = json!({
            "query": document.body,
            "variables": variables,
        });
        let options = RequestOptions::post(self.config.api.graphql_url(), body)
            .header("Accept", GRAPHQL_ACCEPT_HEADER);

        let response = self.request(options).await?;
        let envelope: GraphQlEnvelope =
            serde_json::from_slice(&response.body).map_err(NetworkError::from)?;
        envelope.into_result()
    }

    /// Rewrite cross-origin URLs to the internal worker-to-worker origin
    /// when executing server-side with a caller-supplied transport target.
    /// Chained calls would otherwise re-issue device identity and be
    /// double-billed.
    fn effective_url(&self, url: &str, custom_transport: bool) -> String {
        if !self.config.server_side || !custom_transport {
            return url.to_string();
        }
        let Some(internal_origin) = &self.config.api.internal_origin else {
            return url.to_string();
        };
        let Ok(parsed) = Url::parse(url) else {
            return url.to_string();
        };
        if !self.is_internal(&parsed) {
            return url.to_string();
        }
        let origin = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        if origin == *internal_origin {
            return url.to_string();
        }
        let rewritten = format!(
            "{}{}{}",
            internal_origin.trim_end_matches('/'),
            parsed.path(),
            parsed
                .query()
                .map(|q| format!("?{q}"))
                .unwrap_or_default()
        );
        debug!("Rewrote {} to internal origin: {}", url, rewritten);
        rewritten
    }

    /// Internal-API classification by registrable domain
    fn is_internal(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => registrable_domain(host) == registrable_domain(&self.config.api.host),
            None => false,
        }
    }
}

/// Registrable domain of a hostname: the last two dot-separated labels.
/// Single-label hosts (e.g. localhost) compare as the whole host.
pub fn registrable_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host
    } else {
        labels[labels.len() - 2..].join(".")
    }
}
