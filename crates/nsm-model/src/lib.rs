//! Network Service Manager Registry
//!
//! The model is the shared in-memory state of a network service manager: the
//! endpoints it knows about, the local forwarders, and the client connections
//! it is tracking. Every collection is an instance of the generic
//! [`Domain`] store, which serialises mutations and notifies registered
//! handlers synchronously.
//!
//! # Thread Safety
//!
//! [`Model`] is `Send + Sync` and meant to be shared behind an `Arc`. Reads
//! run concurrently; writes to one collection are exclusive. Read-modify-write
//! of a client connection must use
//! [`Model::apply_client_connection_changes`].
//!
//! # Example
//!
//! ```
//! use nsm_model::{ClientConnection, Model};
//! use nsm_api::CrossConnect;
//!
//! let model = Model::new();
//! let id = model.connection_id();
//! model.add_client_connection(ClientConnection::new(id.clone(), CrossConnect::default()));
//! assert!(model.get_client_connection(&id).is_some());
//! ```

pub mod client_connection;
pub mod domain;
pub mod endpoint;
pub mod forwarder;
pub mod model;

pub use client_connection::{ClientConnection, ClientConnectionState};
pub use domain::{Domain, HandlerId, ModificationHandler};
pub use endpoint::Endpoint;
pub use forwarder::{Forwarder, ForwarderState};
pub use model::{Listener, ListenerId, Model};
