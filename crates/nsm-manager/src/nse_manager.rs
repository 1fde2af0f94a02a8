use async_trait::async_trait;
use nsm_api::{Connection, NseRegistration, Result};

use crate::context::{IgnoredEndpoints, RequestContext};

/// Finds endpoints able to serve a connection.
#[async_trait]
pub trait NetworkServiceEndpointManager: Send + Sync {
    /// Picks an endpoint for `connection` that is not in `ignored`.
    async fn get_endpoint(
        &self,
        ctx: &RequestContext,
        connection: &Connection,
        ignored: &IgnoredEndpoints,
    ) -> Result<NseRegistration>;

    /// Whether the endpoint is registered with this manager.
    fn is_local_endpoint(&self, endpoint: &NseRegistration) -> bool;
}
