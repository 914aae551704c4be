//! HTTP transport for the backend REST API.
//!
//! Executes exactly one request per call and returns the parsed body together
//! with the HTTP status. All success/failure policy lives here so the rest of
//! the engine never inspects raw responses.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// Fixed per-request timeout. Polling loops have their own wall clock on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Statuses the backend uses for successful operations. A `202` signals an
/// asynchronous operation that callers may need to poll.
const SUCCESS_STATUSES: &[u16] = &[200, 201, 202, 204];

/// Sanitize response body for logging: truncate and strip non-printable bytes.
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        // The cut must land on a char boundary; a multibyte character
        // straddling the limit would make a byte slice panic.
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... [truncated, {} bytes total]",
            &body[..end],
            body.len()
        )
    } else {
        body.to_string()
    };
    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A parsed API response: JSON body plus the HTTP status it arrived with.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub body: Value,
    pub status: u16,
}

impl ApiResponse {
    /// Interpret the body as a list of resources, as returned by the
    /// collection endpoints. Non-array bodies yield an empty list.
    pub fn into_items(self) -> Vec<Value> {
        match self.body {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }
}

/// HTTP client wrapper for the backend API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Create a new client for the given API root and access token.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("converge/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Build the absolute URL for a path, substituting `{name}` placeholders
    /// from `path_params`. Absolute paths are used verbatim; relative paths
    /// are joined to the configured API root.
    pub fn absolute_url(
        &self,
        path: &str,
        path_params: Option<&HashMap<String, String>>,
    ) -> Result<String> {
        let mut filled = path.to_string();
        if let Some(params) = path_params {
            for (key, value) in params {
                filled = filled.replace(&format!("{{{key}}}"), value);
            }
        }
        if filled.contains('{') {
            return Err(Error::Configuration(format!(
                "Missing required path parameter in API call: {filled}"
            )));
        }

        if filled.starts_with("http://") || filled.starts_with("https://") {
            Ok(filled)
        } else {
            Ok(format!("{}/{}", self.base_url, filled.trim_start_matches('/')))
        }
    }

    /// Execute one request and return `(body, status)`.
    ///
    /// Success is any status in {200, 201, 202, 204}. An empty body on a GET
    /// yields an empty-list sentinel; an empty body on any other method yields
    /// null. Any other status is a fatal [`Error::Http`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        path_params: Option<&HashMap<String, String>>,
        query: Option<&[(String, String)]>,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let mut url = Url::parse(&self.absolute_url(path, path_params)?)
            .map_err(|e| Error::Configuration(format!("Invalid URL for '{path}': {e}")))?;

        // Repeated keys are how the backend encodes list-valued filters.
        if let Some(pairs) = query {
            let mut qp = url.query_pairs_mut();
            for (key, value) in pairs {
                qp.append_pair(key, value);
            }
        }

        tracing::debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header("Authorization", format!("token {}", self.token));

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !SUCCESS_STATUSES.contains(&status.as_u16()) {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body: text,
            });
        }

        // 204 or an otherwise empty body: GETs get an empty list so callers
        // can iterate without special-casing, everything else gets null.
        if text.is_empty() {
            let body = if method == Method::GET {
                Value::Array(Vec::new())
            } else {
                Value::Null
            };
            return Ok(ApiResponse {
                body,
                status: status.as_u16(),
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        Ok(ApiResponse {
            body: parsed,
            status: status.as_u16(),
        })
    }

    /// GET a single path with no query.
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::GET, path, None, None, None).await
    }

    /// GET a collection endpoint with query filters, returning its items.
    pub async fn get_list(&self, path: &str, query: &[(String, String)]) -> Result<Vec<Value>> {
        let response = self
            .request(Method::GET, path, None, Some(query), None)
            .await?;
        Ok(response.into_items())
    }

    /// POST a JSON body to a path.
    pub async fn post(
        &self,
        path: &str,
        path_params: Option<&HashMap<String, String>>,
        body: &Value,
    ) -> Result<ApiResponse> {
        self.request(Method::POST, path, path_params, None, Some(body))
            .await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the token.
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
