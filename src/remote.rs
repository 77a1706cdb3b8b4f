use crate::endpoint::Endpoints;
use crate::transport::{
    truncate_body, ApiRequest, ApiResponse, ApiTransport, AuthScheme, HttpMethod, TransportError,
    AUTH_ORDER,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const CONTAINER_KEYS: [&str; 5] = ["data", "products", "items", "results", "product"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Shared access to the remote API: one transport, one endpoint layout and
/// a fixed auth order.
pub struct RemoteApi {
    transport: Arc<dyn ApiTransport>,
    endpoints: Endpoints,
}

impl RemoteApi {
    pub fn new(transport: Arc<dyn ApiTransport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn auth_order(&self) -> [AuthScheme; 2] {
        AUTH_ORDER
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let (method, url, auth) = (request.method, request.url.clone(), request.auth);
        let res = self.transport.send(request).await;
        match &res {
            Ok(resp) if !resp.is_success() => log::debug!(
                "{method} {url} with {auth} auth answered {}: {}",
                resp.status,
                truncate_body(&resp.body)
            ),
            Err(err) => log::debug!("{method} {url} with {auth} auth failed: {err}"),
            Ok(_) => (),
        }
        res
    }

    /// GETs `url` with each auth scheme and returns the first JSON body
    /// answered with a 2xx status.
    pub async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Option<Value> {
        for auth in self.auth_order() {
            let mut request = ApiRequest::new(HttpMethod::Get, url, auth);
            for (k, v) in query {
                request = request.query(*k, *v);
            }
            match self.send(request).await {
                Ok(resp) if resp.is_success() => {
                    if let Some(json) = resp.json() {
                        return Some(json);
                    }
                }
                Ok(_) | Err(_) => (),
            }
        }
        None
    }
}

/// Entity-like objects found in any of the known response envelopes.
pub fn collect_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(map) if map.contains_key("id") => vec![value],
        Value::Object(map) => CONTAINER_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .map(collect_items)
            .find(|items| !items.is_empty())
            .unwrap_or_default(),
        _ => vec![],
    }
}

pub fn numeric_id(value: &Value) -> Option<u64> {
    match value.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn first_id(value: &Value) -> Option<u64> {
    collect_items(value).into_iter().find_map(numeric_id)
}

/// Numeric id at the end of a `Location` header, e.g. `/products/123`.
pub fn location_id(location: &str) -> Option<u64> {
    location
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.split('?').next())
        .and_then(|s| s.parse().ok())
}

pub fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_errors(body: &Value) -> Vec<RemoteError> {
    let from_entry = |entry: &Value| match entry {
        Value::String(s) => Some(RemoteError {
            code: None,
            message: s.clone(),
        }),
        Value::Object(_) => {
            let message = text_field(entry, "message").or_else(|| text_field(entry, "error"))?;
            Some(RemoteError {
                code: text_field(entry, "code"),
                message,
            })
        }
        _ => None,
    };
    match body.get("errors") {
        Some(Value::Array(errors)) => return errors.iter().filter_map(from_entry).collect(),
        Some(Value::Object(map)) => {
            return map
                .iter()
                .filter_map(|(field, v)| {
                    let message = match v {
                        Value::Array(msgs) => msgs.first().and_then(Value::as_str)?.to_string(),
                        Value::String(s) => s.clone(),
                        _ => return None,
                    };
                    Some(RemoteError {
                        code: Some(field.clone()),
                        message,
                    })
                })
                .collect()
        }
        _ => (),
    }
    body.get("error")
        .and_then(from_entry)
        .or_else(|| {
            text_field(body, "message").map(|message| RemoteError {
                code: text_field(body, "code"),
                message,
            })
        })
        .into_iter()
        .collect()
}

/// Human readable summary of a rejected response.
pub fn error_message(resp: &ApiResponse, errors: &[RemoteError]) -> String {
    if let Some(first) = errors.first() {
        return first.to_string();
    }
    let body = truncate_body(&resp.body);
    if body.is_empty() {
        format!("HTTP {}", resp.status)
    } else {
        format!("HTTP {}: {body}", resp.status)
    }
}
