use async_trait::async_trait;
use derive_more::{Display, Error};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HttpMethod {
    #[display("GET")]
    Get,
    #[display("POST")]
    Post,
    #[display("PUT")]
    Put,
    #[display("PATCH")]
    Patch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    #[display("bearer")]
    Bearer,
    /// HTTP basic with the key as user name and an empty password.
    #[display("basic")]
    Basic,
}

/// Order in which auth schemes are attempted against the remote API.
pub const AUTH_ORDER: [AuthScheme; 2] = [AuthScheme::Bearer, AuthScheme::Basic];

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub auth: AuthScheme,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new<S: Into<String>>(method: HttpMethod, url: S, auth: AuthScheme) -> Self {
        Self {
            method,
            url: url.into(),
            auth,
            query: vec![],
            body: None,
        }
    }

    pub fn query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error(ignore)]
    #[display("Request timed out: {_0}")]
    Timeout(String),
    #[error(ignore)]
    #[display("Connection failed: {_0}")]
    Connection(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            api_key: normalize_token(api_key),
        })
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.auth {
            AuthScheme::Bearer => builder.bearer_auth(&self.api_key),
            AuthScheme::Basic => builder.basic_auth(&self.api_key, Some("")),
        };
        if let Some(body) = &request.body {
            let body = serde_json::to_string(body)
                .map_err(|err| TransportError::Connection(format!("Unable to encode body: {err}")))?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await?;
        log::debug!(
            "{} {} [{}] -> {status}: {}",
            request.method,
            request.url,
            request.auth,
            truncate_body(&body)
        );
        Ok(ApiResponse {
            status,
            location,
            body,
        })
    }
}

pub fn normalize_token(token: &str) -> String {
    let trimmed = token.trim();
    let lower = trimmed.to_lowercase();
    if let Some(rest) = lower.strip_prefix("bearer ") {
        let offset = trimmed.len().saturating_sub(rest.len());
        trimmed[offset..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.len() <= LIMIT {
        return trimmed.to_string();
    }
    let end = trimmed
        .char_indices()
        .map(|(idx, _)| idx)
        .take_while(|idx| *idx <= LIMIT)
        .last()
        .unwrap_or(0);
    if end == 0 {
        return trimmed.to_string();
    }
    format!("{}…", &trimmed[..end])
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

    /// Records every request and answers from a routing closure.
    pub struct MockTransport {
        handler: Handler,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl MockTransport {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                requests: Mutex::new(vec![]),
            }
        }

        pub fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn requests_to(&self, method: HttpMethod, url: &str) -> Vec<ApiRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.method == method && r.url == url)
                .collect()
        }
    }

    #[async_trait]
    impl ApiTransport for MockTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let res = (self.handler)(&request);
            self.requests.lock().unwrap().push(request);
            res
        }
    }

    pub fn json(status: u16, body: Value) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse::new(status, body.to_string()))
    }
}
