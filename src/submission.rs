use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::payload::Payload;
use crate::remote::{error_message, first_id, location_id, parse_errors, RemoteApi, RemoteError};
use crate::resolver::EntityResolver;
use crate::text::fold;
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, TransportError};
use derive_more::{Display, Error};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const UPDATE_METHODS: [HttpMethod; 3] = [HttpMethod::Put, HttpMethod::Patch, HttpMethod::Post];

const CONFLICT_PHRASES: [&str; 5] = [
    "already exists",
    "duplicate reference",
    "duplicated reference",
    "já existe",
    "referência duplicada",
];

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionAction {
    #[display("created")]
    Created,
    #[display("updated")]
    Updated,
    #[display("found")]
    Found,
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error(ignore)]
    #[display("Validation failed: {_0}")]
    Validation(String),
    #[error(ignore)]
    #[display("Conflict: {_0}")]
    Conflict(String),
    #[error(ignore)]
    #[display("{_0}")]
    RemoteRejection(String),
    #[error(ignore)]
    #[display("Remote answered {_0} without an identifier")]
    AmbiguousSuccess(u16),
    #[error(ignore)]
    #[display("Communication error: {_0}")]
    Communication(String),
    #[error(ignore)]
    #[display("Update of existing product {id} failed: {message}")]
    UpdateFailed { id: u64, message: String },
    #[display("Reference conflict reported but no existing product was found")]
    NotFoundForUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub success: bool,
    /// `0` when the remote side was never reached.
    pub status_code: u16,
    pub remote_id: Option<u64>,
    pub action: Option<SubmissionAction>,
    pub errors: Vec<RemoteError>,
    pub error: Option<SubmissionError>,
}

impl SubmissionResult {
    pub fn succeeded(status_code: u16, remote_id: Option<u64>, action: SubmissionAction) -> Self {
        Self {
            success: true,
            status_code,
            remote_id,
            action: Some(action),
            errors: vec![],
            error: None,
        }
    }

    pub fn failed(status_code: u16, error: SubmissionError, errors: Vec<RemoteError>) -> Self {
        Self {
            success: false,
            status_code,
            remote_id: None,
            action: None,
            errors,
            error: Some(error),
        }
    }

    /// Entity rejected locally, nothing was sent.
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::failed(0, SubmissionError::Validation(message.into()), vec![])
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Decides whether a rejection means "this reference already exists".
#[derive(Debug, Clone, Default)]
pub struct ConflictSignature {
    codes: Vec<String>,
}

impl ConflictSignature {
    pub fn new(codes: Vec<String>) -> Self {
        Self { codes }
    }

    pub fn matches(&self, status: u16, errors: &[RemoteError], body: &str) -> bool {
        if status == 409 {
            return true;
        }
        let by_code = errors.iter().any(|e| {
            e.code
                .as_ref()
                .is_some_and(|c| self.codes.iter().any(|k| k.eq_ignore_ascii_case(c)))
        });
        let texts: Vec<String> = if errors.is_empty() {
            vec![fold(body)]
        } else {
            errors.iter().map(|e| fold(&e.message)).collect()
        };
        by_code
            || texts
                .iter()
                .any(|t| CONFLICT_PHRASES.iter().any(|p| t.contains(&fold(p))))
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Ambiguous {
        status: u16,
        body: String,
    },
    Rejected {
        status: u16,
        errors: Vec<RemoteError>,
        message: String,
        body: String,
    },
    Unreachable(TransportError),
}

impl Failure {
    fn from_response(resp: ApiResponse) -> Self {
        let errors = resp.json().map(|v| parse_errors(&v)).unwrap_or_default();
        Self::Rejected {
            status: resp.status,
            message: error_message(&resp, &errors),
            errors,
            body: resp.body,
        }
    }
}

/// Id confirmation of a 2xx answer, `None` when the answer proves nothing.
fn confirmation(resp: &ApiResponse) -> Option<Option<u64>> {
    if let Some(id) = resp.json().as_ref().and_then(first_id) {
        return Some(Some(id));
    }
    resp.location.as_deref().map(location_id)
}

pub struct SubmissionEngine {
    api: Arc<RemoteApi>,
    resolver: EntityResolver,
    conflict: ConflictSignature,
    sink: Arc<dyn DiagnosticSink>,
}

impl SubmissionEngine {
    pub fn new(
        api: Arc<RemoteApi>,
        conflict: ConflictSignature,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(api.clone()),
            api,
            conflict,
            sink,
        }
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// Creates the product, or updates the existing one when the remote side
    /// reports a reference conflict.
    pub async fn submit(&self, payload: &Payload) -> SubmissionResult {
        let url = self.api.endpoints().products();
        let failures = match self.create(&url, payload.clone().into_value()).await {
            Ok((status, id)) => {
                log::info!(
                    "Created product {} as {}",
                    payload.text("reference").unwrap_or_default(),
                    id.map(|i| i.to_string()).unwrap_or_else(|| "?".to_string())
                );
                return SubmissionResult::succeeded(status, id, SubmissionAction::Created);
            }
            Err(failures) => failures,
        };
        let conflict = failures.iter().find_map(|f| match f {
            Failure::Rejected {
                status,
                errors,
                body,
                ..
            } if self.conflict.matches(*status, errors, body) => Some((*status, errors.clone())),
            _ => None,
        });
        match conflict {
            Some((status, errors)) => self.resolve_and_update(payload, status, errors).await,
            None => self.report("create_product", payload, failures),
        }
    }

    /// Applies `payload` to an existing product. `reference` is never sent.
    pub async fn update(&self, id: u64, payload: &Payload) -> SubmissionResult {
        match self.try_update(id, payload).await {
            Ok(status) => SubmissionResult::succeeded(status, Some(id), SubmissionAction::Updated),
            Err(failures) => {
                let mut res = self.report("update_product", payload, failures);
                res.error = Some(SubmissionError::UpdateFailed {
                    id,
                    message: res.error_message().unwrap_or_default(),
                });
                res
            }
        }
    }

    /// Sends a sales document. Documents are never updated, so a conflict
    /// is a plain failure.
    pub async fn create_document(&self, body: Value, reference: &str) -> SubmissionResult {
        let url = self.api.endpoints().documents();
        match self.create(&url, body).await {
            Ok((status, id)) => SubmissionResult::succeeded(status, id, SubmissionAction::Created),
            Err(failures) => {
                let mut payload = Payload::new();
                payload.insert("reference", reference);
                let mut res = self.report("create_document", &payload, failures);
                if let Some(SubmissionError::RemoteRejection(message)) = &res.error {
                    if self.conflict.matches(res.status_code, &res.errors, message) {
                        res.error = Some(SubmissionError::Conflict(message.clone()));
                    }
                }
                res
            }
        }
    }

    async fn create(&self, url: &str, body: Value) -> Result<(u16, Option<u64>), Vec<Failure>> {
        let mut failures = vec![];
        for auth in self.api.auth_order() {
            let request = ApiRequest::new(HttpMethod::Post, url, auth).body(body.clone());
            match self.api.send(request).await {
                Ok(resp) if resp.is_success() => match confirmation(&resp) {
                    Some(id) => return Ok((resp.status, id)),
                    None => {
                        log::warn!("{url} answered {} with {auth} auth but no id", resp.status);
                        failures.push(Failure::Ambiguous {
                            status: resp.status,
                            body: resp.body,
                        });
                    }
                },
                Ok(resp) => failures.push(Failure::from_response(resp)),
                Err(err) => failures.push(Failure::Unreachable(err)),
            }
        }
        Err(failures)
    }

    async fn try_update(&self, id: u64, payload: &Payload) -> Result<u16, Vec<Failure>> {
        let url = self.api.endpoints().product(id);
        let body = payload.without("reference").into_value();
        let mut failures = vec![];
        for method in UPDATE_METHODS {
            for auth in self.api.auth_order() {
                let request = ApiRequest::new(method, &url, auth).body(body.clone());
                match self.api.send(request).await {
                    Ok(resp) if resp.is_success() => return Ok(resp.status),
                    Ok(resp) => failures.push(Failure::from_response(resp)),
                    Err(err) => failures.push(Failure::Unreachable(err)),
                }
            }
        }
        Err(failures)
    }

    async fn resolve_and_update(
        &self,
        payload: &Payload,
        status: u16,
        errors: Vec<RemoteError>,
    ) -> SubmissionResult {
        let reference = payload.text("reference");
        log::info!(
            "Product {} already exists, looking it up",
            reference.as_deref().unwrap_or("-")
        );
        match self.resolver.find_id(payload).await {
            Some(id) => self.update(id, payload).await,
            None => {
                let res = SubmissionResult::failed(status, SubmissionError::NotFoundForUpdate, errors);
                self.sink.record(&Diagnostic::new(
                    "resolve_product",
                    reference,
                    status,
                    res.error_message().unwrap_or_default(),
                ));
                res
            }
        }
    }

    /// Picks the most informative failure: a remote rejection, then an
    /// ambiguous success, then a transport error.
    fn report(&self, operation: &str, payload: &Payload, failures: Vec<Failure>) -> SubmissionResult {
        let picked = failures
            .iter()
            .rev()
            .find(|f| matches!(f, Failure::Rejected { .. }))
            .or_else(|| {
                failures
                    .iter()
                    .rev()
                    .find(|f| matches!(f, Failure::Ambiguous { .. }))
            })
            .or(failures.last())
            .cloned();
        let (res, body) = match picked {
            Some(Failure::Rejected {
                status,
                errors,
                message,
                body,
            }) => (
                SubmissionResult::failed(status, SubmissionError::RemoteRejection(message), errors),
                body,
            ),
            Some(Failure::Ambiguous { status, body }) => (
                SubmissionResult::failed(status, SubmissionError::AmbiguousSuccess(status), vec![]),
                body,
            ),
            Some(Failure::Unreachable(err)) => (
                SubmissionResult::failed(0, SubmissionError::Communication(err.to_string()), vec![]),
                String::new(),
            ),
            None => (
                SubmissionResult::failed(
                    0,
                    SubmissionError::Communication("No request was sent".to_string()),
                    vec![],
                ),
                String::new(),
            ),
        };
        self.sink.record(
            &Diagnostic::new(
                operation,
                payload.text("reference"),
                res.status_code,
                res.error_message().unwrap_or_default(),
            )
            .response(crate::transport::truncate_body(&body)),
        );
        res
    }
}
