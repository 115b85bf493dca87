//! HTTP plumbing shared by the vendor exporters.

use crate::error::{ExportError, Result};
use reqwest::header::{HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};
use url::Url;

/// Retry-after used when a 429 response carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// How requests are authenticated.
#[derive(Clone)]
pub enum Auth {
    /// No authentication.
    None,
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// A custom header, e.g. `PRIVATE-TOKEN`.
    Header { name: String, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
            Self::Header { name, .. } => write!(f, "Header({name}: ***)"),
        }
    }
}

/// Thin JSON client for one vendor API.
pub struct VendorClient {
    client: Client,
    base_url: String,
    auth: Auth,
    label: &'static str,
}

impl VendorClient {
    /// Create a new client for `base_url`; `label` names the vendor in errors.
    pub fn new(base_url: &str, auth: Auth, label: &'static str) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| ExportError::InvalidConfig(format!("{label} url {base_url:?}: {e}")))?;

        let client = Client::builder()
            .user_agent(concat!("tms-export/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            label,
        })
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the authentication, e.g. after a token exchange.
    pub fn set_auth(&mut self, auth: Auth) {
        self.auth = auth;
    }

    /// Resolve a path or absolute URL against the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') || path.starts_with('?') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Whether `url` points at the same scheme, host and port as the base URL.
    pub fn is_same_origin(&self, url: &str) -> bool {
        match (Url::parse(&self.base_url), Url::parse(url)) {
            (Ok(base), Ok(other)) => base.origin() == other.origin(),
            _ => false,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Header { name, value } => {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| ExportError::InvalidConfig(format!("header name: {e}")))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| ExportError::InvalidConfig(format!("header value: {e}")))?;
                request.header(name, value)
            }
        })
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;

        let status = response.status();
        trace!(%url, %status, "{} response", self.label);

        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                ExportError::AuthenticationFailed(format!("{} rejected credentials ({status})", self.label)),
            ),
            StatusCode::NOT_FOUND => Err(ExportError::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Err(ExportError::RateLimitExceeded(retry_after))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ExportError::ApiError(format!(
                    "{} API error ({status}): {body}",
                    self.label
                )))
            }
        }
    }

    async fn json<T: DeserializeOwned>(&self, response: Response, url: &str) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ExportError::payload(url, e))
    }

    /// Make a GET request and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let request = self.authorize(self.client.get(&url))?;
        let response = self.send(request, &url).await?;
        self.json(response, &url).await
    }

    /// Make a POST request with a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let request = self.authorize(self.client.post(&url).json(body))?;
        let response = self.send(request, &url).await?;
        self.json(response, &url).await
    }

    /// Make a form-encoded POST request and decode the JSON response.
    pub async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "POST form");
        let request = self.authorize(self.client.post(&url).form(form))?;
        let response = self.send(request, &url).await?;
        self.json(response, &url).await
    }

    /// Download a blob. Credentials are only sent to the API's own origin.
    pub async fn get_bytes(&self, path_or_url: &str) -> Result<Vec<u8>> {
        let url = self.url(path_or_url);
        debug!(%url, "GET bytes");
        let mut request = self.client.get(&url);
        if self.is_same_origin(&url) {
            request = self.authorize(request)?;
        }
        let response = self.send(request, &url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExportError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Appends a query parameter to a path that may already carry a query.
pub fn with_query(path: &str, key: &str, value: impl std::fmt::Display) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{key}={value}")
}
