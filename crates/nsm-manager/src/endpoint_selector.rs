use async_trait::async_trait;
use nsm_api::{
    find_mechanism, same_context, Connection, NetworkServiceRequest, NsmError, NseRegistration, Result, State,
};
use nsm_model::{ClientConnection, ClientConnectionState, Model};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

use crate::chain::{NetworkServiceServer, Next};
use crate::context::{IgnoredEndpoints, RequestContext};
use crate::nse_manager::NetworkServiceEndpointManager;

/// Destination id marking a connection whose previous endpoint was rejected.
pub const RESELECTED_DESTINATION_ID: &str = "-";

/// Chooses the endpoint that serves a connection and heals existing ones.
///
/// The stage expects the [`ClientConnection`] of the call to be bound to the
/// context by an earlier stage.
///
/// # Healing
///
/// A connection in [`ClientConnectionState::Healing`] is re-validated rather
/// than re-established when nothing the endpoint cares about changed: same
/// network service, same connection context, and (for a remote destination)
/// the same destination mechanism. In that case the endpoint is not contacted
/// at all and the request's own connection is returned.
///
/// # Selection
///
/// Otherwise candidates are tried one after another. A candidate that fails
/// downstream is added to the exclusion set of this call and never tried
/// again by it. The loop ends on the first success, when the endpoint manager
/// runs out of candidates, or when the context deadline passes.
pub struct EndpointSelectorService {
    model: Arc<Model>,
    nse_manager: Arc<dyn NetworkServiceEndpointManager>,
}

impl EndpointSelectorService {
    pub fn new(model: Arc<Model>, nse_manager: Arc<dyn NetworkServiceEndpointManager>) -> Self {
        Self { model, nse_manager }
    }

    /// Applies `change` to the registered connection, or to `cc` alone if it
    /// is not registered, and refreshes `cc` from the result.
    fn apply(&self, cc: &mut ClientConnection, change: impl Fn(&mut ClientConnection)) {
        match self.model.apply_client_connection_changes(&cc.connection_id, &change) {
            Some(updated) => *cc = updated,
            None => change(cc),
        }
    }

    /// Whether a healing connection has to go back to an endpoint.
    async fn requires_reselection(
        &self,
        ctx: &RequestContext,
        cc: &ClientConnection,
        request: &NetworkServiceRequest,
        next: Next<'_>,
    ) -> bool {
        if cc.connection_state != ClientConnectionState::Healing {
            return false;
        }

        if request.network_service() != cc.network_service() {
            // The old service goes away entirely before a new endpoint is picked.
            if let Some(conn) = request.connection.clone() {
                if let Err(e) = next.process_close(ctx.clone(), conn).await {
                    error!(
                        "Error closing connection {} while switching network service to {}: {}",
                        cc.connection_id,
                        request.network_service(),
                        e
                    );
                }
            }
            return true;
        }

        let required = needs_endpoint_request(cc, request);
        if required {
            info!("Context is different, NSE request is required");
        }
        required
    }

    /// Healing without reselection: update local bookkeeping only.
    async fn update_connection_context(
        &self,
        ctx: RequestContext,
        mut cc: ClientConnection,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        let Some(conn) = request.connection else {
            return Err(NsmError::Validation("request has no connection".to_string()));
        };

        let mechanism = conn.mechanism.clone();
        self.apply(&mut cc, |cc| {
            if let Some(source) = cc.xcon.source.as_mut() {
                source.mechanism = mechanism.clone();
                source.state = State::Up;
            }
        });

        let destination = cc
            .connection_destination()
            .cloned()
            .ok_or_else(|| NsmError::Validation("destination connection is missing".to_string()))
            .and_then(|mut destination| {
                destination.is_complete()?;
                destination.update_context(conn.context.clone())?;
                Ok(destination)
            });

        let destination = match destination {
            Ok(destination) => destination,
            Err(e) => {
                if let Err(close_err) = next.process_close(ctx, conn).await {
                    error!("Failed to perform close: {}", close_err);
                }
                return Err(NsmError::ContextUpdate(Box::new(e)));
            }
        };

        let remote_nsm = cc
            .endpoint
            .as_ref()
            .filter(|endpoint| !self.nse_manager.is_local_endpoint(endpoint))
            .map(|endpoint| endpoint.network_service_manager.clone());
        self.apply(&mut cc, |cc| {
            cc.xcon.destination = Some(destination.clone());
            if remote_nsm.is_some() {
                cc.remote_nsm = remote_nsm.clone();
            }
        });

        Ok(conn)
    }

    /// Picks the endpoint for one attempt.
    ///
    /// A healing connection keeps its endpoint unless this call already
    /// rejected it.
    async fn select_endpoint(
        &self,
        ctx: &RequestContext,
        cc: &mut ClientConnection,
        ignored: &IgnoredEndpoints,
        connection: &Connection,
    ) -> Result<NseRegistration> {
        if cc.connection_state == ClientConnectionState::Healing {
            let previous = cc
                .endpoint
                .as_ref()
                .filter(|endpoint| !ignored.contains_key(&endpoint.endpoint_nsm_name()))
                .cloned();
            if let Some(endpoint) = previous {
                return Ok(endpoint);
            }
            self.apply(cc, |cc| {
                if let Some(destination) = cc.xcon.destination.as_mut() {
                    destination.id = RESELECTED_DESTINATION_ID.to_string();
                }
            });
        }
        self.nse_manager.get_endpoint(ctx, connection, ignored).await
    }

    async fn select_and_request(
        &self,
        ctx: RequestContext,
        mut cc: ClientConnection,
        request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection> {
        let mut ignored = ctx.ignored_endpoints().clone();
        let mut last_error: Option<NsmError> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let span = info_span!(parent: ctx.span(), "select-nse", attempt);
            let attempt_ctx = ctx.clone().with_span(span.clone());

            let mut new_request = request.clone();
            let mut connection = new_request.connection.take().unwrap_or_default();

            let endpoint = match self
                .select_endpoint(&attempt_ctx, &mut cc, &ignored, &connection)
                .instrument(span.clone())
                .await
            {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    if let Some(last) = &last_error {
                        span.in_scope(|| error!("Last NSE error: {}", last));
                    }
                    return Err(NsmError::combine(e, last_error));
                }
            };
            attempt_ctx.log_object("selected endpoint", &endpoint);

            if connection.context.is_none() {
                connection.context = Some(Default::default());
            }
            new_request.connection = Some(connection);

            if let Some(e) = ctx.err() {
                let err = match e {
                    NsmError::Timeout(_) => e,
                    cancelled => NsmError::Timeout(cancelled.to_string()),
                };
                span.in_scope(|| error!("{}", err));
                return Err(err);
            }

            let attempt_ctx = attempt_ctx
                .with_client_connection(cc.clone())
                .with_ignored_endpoints(ignored.clone())
                .with_endpoint(endpoint.clone());

            match next.process_next(attempt_ctx, new_request).instrument(span.clone()).await {
                Ok(conn) => {
                    let remote_nsm = (!self.nse_manager.is_local_endpoint(&endpoint))
                        .then(|| endpoint.network_service_manager.clone());
                    self.apply(&mut cc, |cc| {
                        cc.endpoint = Some(endpoint.clone());
                        if remote_nsm.is_some() {
                            cc.remote_nsm = remote_nsm.clone();
                        }
                    });
                    return Ok(conn);
                }
                Err(e) => {
                    span.in_scope(|| error!("NSE {} responded with error: {}", endpoint.endpoint_nsm_name(), e));
                    ignored.insert(endpoint.endpoint_nsm_name(), endpoint);
                    last_error = Some(e);
                }
            }
        }
    }
}

/// Whether the request asks an endpoint for something the tracked
/// connection does not already have.
fn needs_endpoint_request(cc: &ClientConnection, request: &NetworkServiceRequest) -> bool {
    let requested_context = request.connection.as_ref().and_then(|c| c.context.as_ref());
    let source_context = cc.connection_source().and_then(|c| c.context.as_ref());
    if !same_context(requested_context, source_context) {
        return true;
    }

    let Some(destination) = cc.connection_destination().filter(|d| d.is_remote()) else {
        return false;
    };
    let Some(current) = destination.mechanism.as_ref() else {
        return true;
    };

    let Some(requested) = find_mechanism(&request.mechanism_preferences, &current.mechanism_type) else {
        info!(
            "Remote mechanism previously selected was not found: {} in {:?}",
            current.mechanism_type,
            request
                .mechanism_preferences
                .iter()
                .map(|m| m.mechanism_type.as_str())
                .collect::<Vec<_>>()
        );
        return true;
    };

    for (key, value) in &requested.parameters {
        let previous = current.parameter(key);
        if value != previous {
            info!(
                "Remote mechanism parameter {} was different with previous one: {} {}",
                key, previous, value
            );
            return true;
        }
    }
    if requested != current {
        info!("Remote mechanism was different with previous selected one");
        return true;
    }
    false
}

#[async_trait]
impl NetworkServiceServer for EndpointSelectorService {
    async fn request(&self, ctx: RequestContext, request: NetworkServiceRequest, next: Next<'_>) -> Result<Connection> {
        let Some(cc) = ctx.client_connection().cloned() else {
            return Err(NsmError::InvalidState("client connection need to be passed".to_string()));
        };

        let reselect = self.requires_reselection(&ctx, &cc, &request, next).await;
        ctx.log_object("requires_reselection", &reselect);

        if cc.connection_state == ClientConnectionState::Healing && !reselect {
            return self.update_connection_context(ctx, cc, request, next).await;
        }
        self.select_and_request(ctx, cc, request, next).await
    }

    async fn close(&self, ctx: RequestContext, connection: Connection, next: Next<'_>) -> Result<()> {
        next.process_close(ctx, connection).await
    }
}
