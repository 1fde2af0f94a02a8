use nsm_api::{Connection, CrossConnect, NetworkServiceManager, NetworkServiceRequest, NseRegistration};
use serde::{Deserialize, Serialize};

use crate::forwarder::ForwarderState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientConnectionState {
    #[default]
    Ready,
    Requesting,
    /// Undergoing failure recovery or a mechanism update.
    Healing,
    Closing,
}

/// The tracked end-to-end record of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnection {
    pub connection_id: String,
    pub xcon: CrossConnect,
    /// Manager owning the endpoint, set when the endpoint is remote.
    pub remote_nsm: Option<NetworkServiceManager>,
    pub endpoint: Option<NseRegistration>,
    pub forwarder_registered_name: String,
    pub connection_state: ClientConnectionState,
    pub request: Option<NetworkServiceRequest>,
    pub forwarder_state: ForwarderState,
}

impl ClientConnection {
    pub fn new(connection_id: impl Into<String>, xcon: CrossConnect) -> Self {
        Self {
            connection_id: connection_id.into(),
            xcon,
            ..Default::default()
        }
    }

    pub fn network_service(&self) -> &str {
        match &self.request {
            Some(request) => request.network_service(),
            None => self
                .xcon
                .source
                .as_ref()
                .map(|c| c.network_service.as_str())
                .unwrap_or(""),
        }
    }

    pub fn connection_source(&self) -> Option<&Connection> {
        self.xcon.source.as_ref()
    }

    pub fn connection_destination(&self) -> Option<&Connection> {
        self.xcon.destination.as_ref()
    }
}
