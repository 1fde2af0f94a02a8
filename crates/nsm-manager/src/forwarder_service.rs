use async_trait::async_trait;
use nsm_api::mechanism::srv6;
use nsm_api::{Connection, Mechanism, NetworkServiceRequest, NsmError, Result};
use nsm_model::{ClientConnection, Forwarder, ForwarderState, Model};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, info_span, Instrument};

use crate::chain::{NetworkServiceServer, Next};
use crate::config::ManagerConfig;
use crate::context::RequestContext;
use crate::service_registry::{ServiceRegistry, Transport};

/// Path segments whose name starts with this belong to a forwarder.
pub const FORWARDER_NAME_PREFIX: &str = "forwarder";

/// Whether the current path segment already names a forwarder.
pub fn is_forwarder_request(request: &NetworkServiceRequest) -> bool {
    request
        .connection
        .as_ref()
        .and_then(|conn| conn.path.as_ref())
        .and_then(|path| path.current())
        .is_some_and(|segment| segment.name.starts_with(FORWARDER_NAME_PREFIX))
}

/// Programs a local forwarder for each connection.
///
/// Candidates are the endpoints registered for the per-host forwarder
/// service. They are tried in registry order and the first one that accepts
/// the request is used. A failed candidate is only skipped for this call.
///
/// On close the forwarder cross-connect is removed after the rest of the
/// chain has closed; failures while doing so are logged, never returned.
///
/// SRv6 SIDs handed to the remote side are held per connection until the
/// connection closes, a heal replaces them, or the downstream request fails.
pub struct ForwarderService {
    model: Arc<Model>,
    service_registry: Arc<dyn ServiceRegistry>,
    config: ManagerConfig,
    sids: Mutex<HashMap<String, Vec<String>>>,
}

impl ForwarderService {
    pub fn new(model: Arc<Model>, service_registry: Arc<dyn ServiceRegistry>, config: ManagerConfig) -> Self {
        Self {
            model,
            service_registry,
            config,
            sids: Mutex::new(HashMap::new()),
        }
    }

    /// Mechanisms to offer the remote side, based on the mechanism the
    /// forwarder selected, along with the SIDs allocated for them.
    fn prepare_remote_mechanisms(&self, connection: &Connection) -> (Vec<Mechanism>, Vec<String>) {
        let Some(mut mechanism) = connection.mechanism.clone() else {
            return (Vec::new(), Vec::new());
        };
        let mut sids = Vec::new();
        if mechanism.mechanism_type == srv6::MECHANISM {
            let allocator = self.service_registry.sid_allocator();
            for key in [srv6::SRC_BSID, srv6::SRC_LOCAL_SID] {
                let sid = allocator.sid(&connection.id);
                mechanism.parameters.insert(key.to_string(), sid.clone());
                sids.push(sid);
            }
        }
        (vec![mechanism], sids)
    }

    fn release_sids(&self, sids: &[String]) {
        if sids.is_empty() {
            return;
        }
        let allocator = self.service_registry.sid_allocator();
        for sid in sids {
            allocator.release(sid);
        }
    }

    /// Records the SIDs now in use by `connection_id`, releasing the ones
    /// they replace.
    fn hold_sids(&self, connection_id: &str, sids: Vec<String>) {
        let previous = {
            let mut held = self.sids.lock().unwrap_or_else(PoisonError::into_inner);
            if sids.is_empty() {
                held.remove(connection_id)
            } else {
                held.insert(connection_id.to_string(), sids)
            }
        };
        if let Some(previous) = previous {
            self.release_sids(&previous);
        }
    }

    fn release_held_sids(&self, connection_id: &str) {
        let held = self
            .sids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id);
        if let Some(sids) = held {
            self.release_sids(&sids);
        }
    }

    async fn close_forwarder(&self, ctx: &RequestContext, cc: &ClientConnection) -> Result<()> {
        if cc.forwarder_state == ForwarderState::None {
            return Ok(());
        }
        info!("Closing cross connection on forwarder {}", cc.forwarder_registered_name);

        let forwarder = self
            .model
            .get_forwarder(&cc.forwarder_registered_name)
            .ok_or_else(|| NsmError::ForwarderNotFound(cc.forwarder_registered_name.clone()))?;

        let ctx = ctx.child().with_timeout(self.config.forwarder.close_timeout);
        let (client, transport) = self.service_registry.forwarder_connection(&ctx, &forwarder).await?;
        let result = ctx.run(client.close(&ctx, &cc.xcon)).await;
        close_transport(transport);
        result?;

        info!("Cross connection successfully closed on forwarder");
        self.model
            .apply_client_connection_changes(&cc.connection_id, |cc| cc.forwarder_state = ForwarderState::None);
        Ok(())
    }
}

#[async_trait]
impl NetworkServiceServer for ForwarderService {
    async fn request(&self, ctx: RequestContext, mut request: NetworkServiceRequest, next: Next<'_>) -> Result<Connection> {
        if is_forwarder_request(&request) {
            return next.process_next(ctx, request).await;
        }

        info!("Finding forwarder for request: {}", request);
        let candidates = self
            .model
            .get_endpoints_by_network_service(&self.config.forwarder_service_name());
        if candidates.is_empty() {
            return Err(NsmError::NoForwarders);
        }

        for candidate in candidates {
            let span = info_span!(parent: ctx.span(), "forwarder", name = %candidate.endpoint_name());
            info!(parent: &span, "Forwarder candidate: {}", candidate.endpoint_name());

            let (client, transport) = match ctx
                .run(self.service_registry.endpoint_connection(&ctx, &candidate))
                .instrument(span.clone())
                .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    error!(parent: &span, "Failed to connect forwarder: {}", e);
                    continue;
                }
            };

            let call_ctx = ctx.child().with_timeout(self.config.forwarder.request_timeout);
            let result = call_ctx
                .run(client.request(&call_ctx, request.clone()))
                .instrument(span.clone())
                .await;
            close_transport(transport);
            let conn = match result {
                Ok(conn) => conn,
                Err(e) => {
                    error!(parent: &span, "Failed to use forwarder {}: {}", candidate.endpoint_name(), e);
                    continue;
                }
            };

            let forwarder = Forwarder::new(candidate.endpoint_name(), candidate.socket_location.clone());
            if self.model.get_forwarder(&forwarder.registered_name).is_none() {
                self.model.add_forwarder(forwarder.clone());
            }

            let connection_id = ctx
                .client_connection()
                .map_or_else(|| conn.id.clone(), |cc| cc.connection_id.clone());
            let (remote_mechanisms, sids) = self.prepare_remote_mechanisms(&conn);
            request.connection = Some(conn);
            let next_ctx = ctx
                .clone()
                .with_span(span.clone())
                .with_forwarder(forwarder.clone())
                .with_remote_mechanisms(remote_mechanisms);

            let result = next.process_next(next_ctx, request).instrument(span).await;
            match &result {
                Ok(_) => {
                    self.hold_sids(&connection_id, sids);
                    if ctx.client_connection().is_some() {
                        let name = forwarder.registered_name;
                        self.model.apply_client_connection_changes(&connection_id, |cc| {
                            cc.forwarder_registered_name = name;
                            cc.forwarder_state = ForwarderState::Ready;
                        });
                    }
                }
                Err(_) => self.release_sids(&sids),
            }
            return result;
        }

        Err(NsmError::NoValidForwarder(request.to_string()))
    }

    async fn close(&self, ctx: RequestContext, connection: Connection, next: Next<'_>) -> Result<()> {
        let connection_id = ctx
            .client_connection()
            .map_or_else(|| connection.id.clone(), |cc| cc.connection_id.clone());
        let result = next.process_close(ctx.clone(), connection).await;

        let cc = ctx
            .client_connection()
            .and_then(|bound| self.model.get_client_connection(&bound.connection_id).or_else(|| Some(bound.clone())));
        if let Some(cc) = cc {
            if let Err(e) = self.close_forwarder(&ctx, &cc).await {
                error!("Failed to close forwarder for connection {}: {}", cc.connection_id, e);
            }
        }
        self.release_held_sids(&connection_id);

        result
    }
}

fn close_transport(transport: Option<Box<dyn Transport>>) {
    if let Some(transport) = transport {
        if let Err(e) = transport.close() {
            error!("Failed to close forwarder transport: {}", e);
        }
    }
}
