//! Network Service Mesh API Types
//!
//! This crate holds the value types exchanged between the stages of the
//! network service manager: connections and their mechanisms and contexts,
//! requests, cross-connects, and the registry records that describe endpoints
//! and managers. It also defines the shared error type.
//!
//! # Components
//!
//! - [`connection`] - `Connection`, `Path` and connection `State`
//! - [`context`] - `ConnectionContext` and the context equality policy
//! - [`mechanism`] - `Mechanism` and the well-known mechanism types
//! - [`request`] - `NetworkServiceRequest`
//! - [`crossconnect`] - `CrossConnect`, the source/destination pair
//! - [`registry`] - `NseRegistration`, `NetworkServiceManager` and friends
//! - [`error`] - `NsmError` and `Result`
//! - [`tools`] - environment and port helpers
//!
//! # Example
//!
//! ```
//! use nsm_api::{Connection, Mechanism, MechanismClass, NetworkServiceRequest};
//! use nsm_api::mechanism::kernel;
//!
//! let conn = Connection::new("1", "secure-intranet")
//!     .with_mechanism(Mechanism::new(MechanismClass::Local, kernel::MECHANISM));
//! let request = NetworkServiceRequest::new(conn);
//! assert_eq!(request.network_service(), "secure-intranet");
//! ```

pub mod connection;
pub mod context;
pub mod crossconnect;
pub mod error;
pub mod mechanism;
pub mod registry;
pub mod request;
pub mod tools;

pub use connection::{Connection, Path, PathSegment, State};
pub use context::{same_context, ConnectionContext, DnsConfig, IpContext};
pub use crossconnect::CrossConnect;
pub use error::{NsmError, Result};
pub use mechanism::{find_mechanism, Mechanism, MechanismClass};
pub use registry::{
    EndpointNsmName, NetworkService, NetworkServiceEndpoint, NetworkServiceManager, NseRegistration,
};
pub use request::NetworkServiceRequest;
