use async_trait::async_trait;
use nsm_api::{Connection, CrossConnect, NetworkServiceRequest, NsmError, Result};
use nsm_model::{ClientConnection, ClientConnectionState, Model};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{NetworkServiceServer, Next};
use crate::context::RequestContext;

/// Binds every call to its tracked [`ClientConnection`].
///
/// A request naming a known connection heals it; any other request creates a
/// fresh record with a newly allocated id. The record is bound to the context
/// for the stages after this one.
pub struct ConnectionService {
    model: Arc<Model>,
}

impl ConnectionService {
    pub fn new(model: Arc<Model>) -> Self {
        Self { model }
    }

    /// Returns the bound connection and whether it was created by this call.
    fn bind(&self, request: &mut NetworkServiceRequest) -> Result<(ClientConnection, bool)> {
        let Some(conn) = request.connection.as_mut() else {
            return Err(NsmError::Validation("request has no connection".to_string()));
        };

        if !conn.id.is_empty() {
            let mut observed = None;
            let healed = self.model.apply_client_connection_changes(&conn.id, |cc| {
                observed = Some(cc.connection_state);
                if matches!(
                    cc.connection_state,
                    ClientConnectionState::Ready | ClientConnectionState::Healing
                ) {
                    cc.connection_state = ClientConnectionState::Healing;
                }
            });
            if let Some(cc) = healed {
                if let Some(state @ (ClientConnectionState::Closing | ClientConnectionState::Requesting)) = observed {
                    return Err(NsmError::InvalidState(format!("connection {} is {:?}", conn.id, state)));
                }
                info!("Healing connection {}", cc.connection_id);
                return Ok((cc, false));
            }
        }

        conn.id = self.model.connection_id();
        let mut cc = ClientConnection::new(conn.id.clone(), CrossConnect::new(&conn.id, Some(conn.clone()), None));
        cc.connection_state = ClientConnectionState::Requesting;
        cc.request = Some(request.clone());
        self.model.add_client_connection(cc.clone());
        debug!("Created client connection {}", cc.connection_id);
        Ok((cc, true))
    }
}

#[async_trait]
impl NetworkServiceServer for ConnectionService {
    async fn request(&self, ctx: RequestContext, mut request: NetworkServiceRequest, next: Next<'_>) -> Result<Connection> {
        let (cc, fresh) = self.bind(&mut request)?;
        let id = cc.connection_id.clone();
        let ctx = ctx.with_client_connection(cc);

        match next.process_next(ctx, request.clone()).await {
            Ok(conn) => {
                let source = conn.clone();
                self.model.apply_client_connection_changes(&id, |cc| {
                    cc.connection_state = ClientConnectionState::Ready;
                    cc.xcon.source = Some(source);
                    cc.request = Some(request);
                });
                Ok(conn)
            }
            Err(e) => {
                if fresh {
                    self.model.delete_client_connection(&id);
                } else {
                    warn!("Healing of connection {} failed: {}", id, e);
                    self.model.apply_client_connection_changes(&id, |cc| {
                        cc.connection_state = ClientConnectionState::Ready;
                    });
                }
                Err(e)
            }
        }
    }

    async fn close(&self, ctx: RequestContext, connection: Connection, next: Next<'_>) -> Result<()> {
        let Some(cc) = self.model.apply_client_connection_changes(&connection.id, |cc| {
            cc.connection_state = ClientConnectionState::Closing;
        }) else {
            return Err(NsmError::InvalidState(format!("no connection with id {}", connection.id)));
        };

        let id = cc.connection_id.clone();
        let result = next.process_close(ctx.with_client_connection(cc), connection).await;
        self.model.delete_client_connection(&id);
        result
    }
}
