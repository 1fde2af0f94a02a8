use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceManager {
    pub name: String,
    pub url: String,
}

impl NetworkServiceManager {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkService {
    pub name: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceEndpoint {
    pub name: String,
    pub network_service_name: String,
    pub network_service_manager_name: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Identity of an endpoint across managers: `<endpoint>@<manager>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointNsmName(String);

impl EndpointNsmName {
    pub fn new(endpoint: &str, manager: &str) -> Self {
        Self(format!("{}@{}", endpoint, manager))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointNsmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registration record of an endpoint as announced by its manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NseRegistration {
    pub network_service: NetworkService,
    pub network_service_manager: NetworkServiceManager,
    pub network_service_endpoint: NetworkServiceEndpoint,
}

impl NseRegistration {
    pub fn new(endpoint: &str, network_service: &str, manager: NetworkServiceManager) -> Self {
        Self {
            network_service: NetworkService {
                name: network_service.to_string(),
                payload: String::new(),
            },
            network_service_endpoint: NetworkServiceEndpoint {
                name: endpoint.to_string(),
                network_service_name: network_service.to_string(),
                network_service_manager_name: manager.name.clone(),
                ..Default::default()
            },
            network_service_manager: manager,
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.network_service_endpoint.name
    }

    pub fn network_service_name(&self) -> &str {
        &self.network_service.name
    }

    pub fn endpoint_nsm_name(&self) -> EndpointNsmName {
        EndpointNsmName::new(self.endpoint_name(), &self.network_service_manager.name)
    }
}
