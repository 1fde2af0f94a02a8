use crate::connection::Connection;
use serde::{Deserialize, Serialize};

/// The pair of connection segments a forwarder splices together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossConnect {
    pub id: String,
    #[serde(default)]
    pub payload: String,
    pub source: Option<Connection>,
    pub destination: Option<Connection>,
}

impl CrossConnect {
    pub fn new(id: impl Into<String>, source: Option<Connection>, destination: Option<Connection>) -> Self {
        Self {
            id: id.into(),
            payload: String::new(),
            source,
            destination,
        }
    }
}
