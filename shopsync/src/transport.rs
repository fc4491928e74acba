use crate::error::{ApiError, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            _ => Err(anyhow::anyhow!("unknown method: {}", s)),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One logical call against the backend.
///
/// `path` is relative to the configured base URL (eg, `/products`). The `retried` flag belongs to
/// this request only; it is how the client guarantees a single replay per call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub(crate) retried: bool,
    pub(crate) recover: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: HashMap::new(),
            body: None,
            headers: HeaderMap::new(),
            retried: false,
            recover: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).json(body)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, params: HashMap<String, String>) -> Self {
        self.query.extend(params);
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    /// Opts this request out of refresh-and-retry; a 401 is handed back like any other status.
    pub fn without_recovery(mut self) -> Self {
        self.recover = false;
        self
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Sets (or replaces) the bearer credential on this request.
    pub(crate) fn set_bearer(&mut self, token: &str) -> Result<()> {
        let mut auth_value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ApiError::InvalidToken)?;
        auth_value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, auth_value);
        Ok(())
    }

    /// The bearer token currently attached, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        ApiResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Helper for building JSON responses, mostly used by fake transports.
    pub fn from_json(status: u16, val: &Value) -> Self {
        let mut resp = ApiResponse::new(status, val.to_string());
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        resp
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parses the body as JSON, treating an empty body (eg, `204 No Content`) as `None`.
    pub fn json_opt(&self) -> Result<Option<Value>> {
        if self.body.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(None)
        } else {
            Ok(Some(self.json()?))
        }
    }

    /// Turns any non-2xx status into [`ApiError::Backend`], keeping the status and body.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let body: Option<Value> = serde_json::from_slice(&self.body).ok();
        let message = body
            .as_ref()
            .and_then(|val| val["message"].as_str().or(val["error"].as_str()))
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(&self.body).trim().to_string();
                if text.is_empty() {
                    "unknown".to_string()
                } else {
                    text
                }
            });
        Err(ApiError::Backend {
            status: self.status,
            message,
            body,
        })
    }
}

/// The network seam. Implementations send exactly what they are given; authentication is
/// handled by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(HttpTransport {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(&request.path);
        debug!(
            "HTTP {} {} params={:?} body={}",
            request.method,
            url,
            request.query,
            request.body.is_some()
        );
        let mut req = self
            .http_client
            .request(request.method.into(), url)
            .headers(request.headers.clone())
            .query(&request.query);
        req = if let Some(b) = &request.body {
            req.json(b)
        } else {
            req
        };
        let res = req.send().await?;
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let body = res.bytes().await?.to_vec();
        debug!("HTTP response status={} len={}", status, body.len());
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[test]
fn test_http_method() {
    assert_eq!(HttpMethod::from_str("get").unwrap(), HttpMethod::Get);
    assert_eq!(HttpMethod::from_str("PATCH").unwrap(), HttpMethod::Patch);
    assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    assert!(HttpMethod::from_str("fetch").is_err());
    assert!(HttpMethod::from_str("").is_err());
}

#[test]
fn test_bearer_header() {
    let mut req = ApiRequest::get("/products");
    assert_eq!(req.bearer(), None);
    req.set_bearer("abc").unwrap();
    assert_eq!(req.bearer(), Some("abc"));
    assert!(req.headers[header::AUTHORIZATION].is_sensitive());
    req.set_bearer("xyz").unwrap();
    assert_eq!(req.bearer(), Some("xyz"));
    assert_eq!(req.headers.get_all(header::AUTHORIZATION).iter().count(), 1);
    assert!(req.set_bearer("bad\ntoken").is_err());
}

#[test]
fn test_error_for_status() {
    let ok = ApiResponse::from_json(200, &serde_json::json!([]));
    assert!(ok.error_for_status().is_ok());

    let resp = ApiResponse::from_json(400, &serde_json::json!({"message": "preço inválido"}));
    match resp.error_for_status() {
        Err(ApiError::Backend {
            status,
            message,
            body,
        }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "preço inválido");
            assert!(body.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }

    let resp = ApiResponse::new(502, "Bad Gateway");
    match resp.error_for_status() {
        Err(ApiError::Backend { message, body, .. }) => {
            assert_eq!(message, "Bad Gateway");
            assert!(body.is_none());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_json_opt_empty() {
    assert!(ApiResponse::new(204, "").json_opt().unwrap().is_none());
    assert_eq!(
        ApiResponse::new(200, "{\"a\":1}").json_opt().unwrap(),
        Some(serde_json::json!({"a": 1}))
    );
}
