use nsm_api::{EndpointNsmName, NseRegistration};
use serde::{Deserialize, Serialize};

/// An endpoint known to this manager, local or remote.
///
/// Locality is not stored here. It is decided per call by the endpoint
/// manager's `is_local_endpoint`, from the registration's manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub registration: NseRegistration,
    /// Socket the endpoint listens on, for endpoints local to this manager.
    pub socket_location: String,
}

impl Endpoint {
    pub fn new(registration: NseRegistration, socket_location: impl Into<String>) -> Self {
        Self {
            registration,
            socket_location: socket_location.into(),
        }
    }

    pub fn endpoint_name(&self) -> &str {
        self.registration.endpoint_name()
    }

    pub fn network_service_name(&self) -> &str {
        self.registration.network_service_name()
    }

    pub fn endpoint_nsm_name(&self) -> EndpointNsmName {
        self.registration.endpoint_nsm_name()
    }
}
