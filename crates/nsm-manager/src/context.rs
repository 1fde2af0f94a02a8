use nsm_api::{EndpointNsmName, Mechanism, NsmError, NseRegistration, Result};
use nsm_model::{ClientConnection, Forwarder};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

/// Endpoints already tried and rejected within one request.
pub type IgnoredEndpoints = HashMap<EndpointNsmName, NseRegistration>;

/// Request-scoped values threaded explicitly through every stage.
///
/// Stages derive a new context with the `with_*` builders before handing it
/// downstream, so a value attached by one stage is only seen by the stages
/// after it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    span: Span,
    client_connection: Option<ClientConnection>,
    ignored_endpoints: IgnoredEndpoints,
    endpoint: Option<NseRegistration>,
    forwarder: Option<Forwarder>,
    remote_mechanisms: Vec<Mechanism>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// A context without a deadline.
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            span: Span::current(),
            client_connection: None,
            ignored_endpoints: IgnoredEndpoints::new(),
            endpoint: None,
            forwarder: None,
            remote_mechanisms: Vec::new(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets the deadline; an earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// A child context that is cancelled together with this one.
    pub fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.cancel = self.cancel.child_token();
        ctx
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<NsmError> {
        if self.cancel.is_cancelled() {
            return Some(NsmError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(NsmError::Timeout("context deadline exceeded".to_string()))
            }
            _ => None,
        }
    }

    /// Runs `fut`, giving up when the context is cancelled or its deadline passes.
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = fut => result,
            _ = self.cancel.cancelled() => Err(NsmError::Cancelled),
            _ = expired => Err(NsmError::Timeout("context deadline exceeded".to_string())),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Logs `value` as JSON on the request span at debug level.
    pub fn log_object<T: Serialize>(&self, name: &str, value: &T) {
        let _enter = self.span.enter();
        match serde_json::to_string(value) {
            Ok(json) => debug!(object = name, "{}", json),
            Err(e) => debug!(object = name, "unserializable: {}", e),
        }
    }

    pub fn client_connection(&self) -> Option<&ClientConnection> {
        self.client_connection.as_ref()
    }

    pub fn with_client_connection(mut self, cc: ClientConnection) -> Self {
        self.client_connection = Some(cc);
        self
    }

    pub fn ignored_endpoints(&self) -> &IgnoredEndpoints {
        &self.ignored_endpoints
    }

    pub fn with_ignored_endpoints(mut self, ignored: IgnoredEndpoints) -> Self {
        self.ignored_endpoints = ignored;
        self
    }

    pub fn endpoint(&self) -> Option<&NseRegistration> {
        self.endpoint.as_ref()
    }

    pub fn with_endpoint(mut self, endpoint: NseRegistration) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn forwarder(&self) -> Option<&Forwarder> {
        self.forwarder.as_ref()
    }

    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn remote_mechanisms(&self) -> &[Mechanism] {
        &self.remote_mechanisms
    }

    pub fn with_remote_mechanisms(mut self, mechanisms: Vec<Mechanism>) -> Self {
        self.remote_mechanisms = mechanisms;
        self
    }
}
