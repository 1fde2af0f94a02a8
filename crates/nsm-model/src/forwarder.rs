use nsm_api::Mechanism;
use serde::{Deserialize, Serialize};

/// Whether a forwarder is currently splicing a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwarderState {
    /// Not yet programmed for the connection.
    #[default]
    None,
    /// Actively splicing the connection.
    Ready,
}

/// A local data-plane agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forwarder {
    pub registered_name: String,
    pub socket_location: String,
    pub local_mechanisms: Vec<Mechanism>,
    pub remote_mechanisms: Vec<Mechanism>,
    pub mechanisms_configured: bool,
}

impl Forwarder {
    pub fn new(registered_name: impl Into<String>, socket_location: impl Into<String>) -> Self {
        Self {
            registered_name: registered_name.into(),
            socket_location: socket_location.into(),
            ..Default::default()
        }
    }
}
