//! Network Service Manager connection orchestration.
//!
//! Requests flow through a linear chain of [`NetworkServiceServer`] stages
//! driven by a [`CompositeService`]. The stages provided here bind a call to
//! its tracked connection, pick and heal endpoints, and program a local
//! forwarder; [`local_network_service_server`] chains them in that order.
//! Dialing endpoints and forwarders is left to a [`ServiceRegistry`]
//! supplied by the caller.

pub mod chain;
pub mod config;
pub mod connection_service;
pub mod context;
pub mod endpoint_selector;
pub mod forwarder_service;
pub mod nse_manager;
pub mod server;
pub mod service_registry;
pub mod sid;

pub use chain::{CompositeService, NetworkServiceServer, Next};
pub use config::{ForwarderConfig, ManagerConfig};
pub use connection_service::ConnectionService;
pub use context::{IgnoredEndpoints, RequestContext};
pub use endpoint_selector::EndpointSelectorService;
pub use forwarder_service::{is_forwarder_request, ForwarderService, FORWARDER_NAME_PREFIX};
pub use nse_manager::NetworkServiceEndpointManager;
pub use server::{local_network_service_server, LOCAL_CHAIN_NAME};
pub use service_registry::{
    EndpointConnection, ForwarderClient, ForwarderConnection, NetworkServiceClient, ServiceRegistry, SidAllocator,
    Transport,
};
pub use sid::PrefixSidAllocator;
