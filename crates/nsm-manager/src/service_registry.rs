use async_trait::async_trait;
use nsm_api::{Connection, CrossConnect, NetworkServiceRequest, Result};
use nsm_model::{Endpoint, Forwarder};
use std::sync::Arc;

use crate::context::RequestContext;

/// Client for the network service API of an endpoint or forwarder.
#[async_trait]
pub trait NetworkServiceClient: Send + Sync {
    async fn request(&self, ctx: &RequestContext, request: NetworkServiceRequest) -> Result<Connection>;

    async fn close(&self, ctx: &RequestContext, connection: Connection) -> Result<()>;
}

/// Client for the cross-connect API of a forwarder.
#[async_trait]
pub trait ForwarderClient: Send + Sync {
    async fn close(&self, ctx: &RequestContext, xcon: &CrossConnect) -> Result<()>;
}

/// A transport resource held open for a client.
pub trait Transport: Send + Sync {
    fn close(&self) -> Result<()>;
}

/// Allocates segment identifiers for SRv6 mechanisms.
pub trait SidAllocator: Send + Sync {
    fn sid(&self, connection_id: &str) -> String;

    fn release(&self, sid: &str);
}

pub type EndpointConnection = (Arc<dyn NetworkServiceClient>, Option<Box<dyn Transport>>);
pub type ForwarderConnection = (Arc<dyn ForwarderClient>, Option<Box<dyn Transport>>);

/// Dials endpoints and forwarders.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn endpoint_connection(&self, ctx: &RequestContext, endpoint: &Endpoint) -> Result<EndpointConnection>;

    async fn forwarder_connection(&self, ctx: &RequestContext, forwarder: &Forwarder) -> Result<ForwarderConnection>;

    fn sid_allocator(&self) -> Arc<dyn SidAllocator>;
}
