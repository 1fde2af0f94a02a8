use crate::connection::Connection;
use crate::mechanism::Mechanism;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request to establish, update or heal a connection to a network service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceRequest {
    pub connection: Option<Connection>,
    #[serde(default)]
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceRequest {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
            mechanism_preferences: Vec::new(),
        }
    }

    pub fn with_mechanism_preferences(mut self, preferences: Vec<Mechanism>) -> Self {
        self.mechanism_preferences = preferences;
        self
    }

    pub fn network_service(&self) -> &str {
        self.connection
            .as_ref()
            .map(|c| c.network_service.as_str())
            .unwrap_or("")
    }

    pub fn connection_id(&self) -> &str {
        self.connection.as_ref().map(|c| c.id.as_str()).unwrap_or("")
    }
}

impl fmt::Display for NetworkServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request(id={}, network_service={})",
            self.connection_id(),
            self.network_service()
        )
    }
}
