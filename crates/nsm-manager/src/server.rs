use nsm_model::Model;
use std::sync::Arc;

use crate::chain::{CompositeService, NetworkServiceServer};
use crate::config::ManagerConfig;
use crate::connection_service::ConnectionService;
use crate::endpoint_selector::EndpointSelectorService;
use crate::forwarder_service::ForwarderService;
use crate::nse_manager::NetworkServiceEndpointManager;
use crate::service_registry::ServiceRegistry;

/// Name of the chain built by [`local_network_service_server`].
pub const LOCAL_CHAIN_NAME: &str = "local";

/// Builds the chain serving requests from local clients.
///
/// Stages run in this order: connection binding, endpoint selection,
/// forwarder programming, then `downstream`. Each endpoint attempt made by
/// the selector therefore programs a forwarder of its own, and a close
/// issued by the selector reaches the forwarder.
///
/// `downstream` holds the stages that talk to the chosen endpoint.
pub fn local_network_service_server(
    model: Arc<Model>,
    nse_manager: Arc<dyn NetworkServiceEndpointManager>,
    service_registry: Arc<dyn ServiceRegistry>,
    config: ManagerConfig,
    downstream: impl IntoIterator<Item = Arc<dyn NetworkServiceServer>>,
) -> CompositeService {
    let mut servers: Vec<Arc<dyn NetworkServiceServer>> = vec![
        Arc::new(ConnectionService::new(model.clone())),
        Arc::new(EndpointSelectorService::new(model.clone(), nse_manager)),
        Arc::new(ForwarderService::new(model, service_registry, config)),
    ];
    servers.extend(downstream);
    CompositeService::new(LOCAL_CHAIN_NAME, servers)
}
