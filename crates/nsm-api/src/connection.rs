use crate::context::ConnectionContext;
use crate::error::{NsmError, Result};
use crate::mechanism::Mechanism;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Up,
    #[default]
    Down,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub token: String,
}

impl PathSegment {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            token: String::new(),
        }
    }
}

/// The chain of managers and forwarders a connection traverses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub index: u32,
    pub path_segments: Vec<PathSegment>,
}

impl Path {
    pub fn current(&self) -> Option<&PathSegment> {
        self.path_segments.get(self.index as usize)
    }
}

/// One segment of an end-to-end connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub network_service: String,
    pub mechanism: Option<Mechanism>,
    pub context: Option<ConnectionContext>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub path: Option<Path>,
    #[serde(default)]
    pub network_service_endpoint_name: String,
    #[serde(default)]
    pub state: State,
}

impl Connection {
    pub fn new(id: impl Into<String>, network_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            ..Default::default()
        }
    }

    pub fn with_mechanism(mut self, mechanism: Mechanism) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn with_context(mut self, context: ConnectionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// A connection is remote when its selected mechanism is a remote one.
    pub fn is_remote(&self) -> bool {
        self.mechanism.as_ref().is_some_and(Mechanism::is_remote)
    }

    pub fn is_valid(&self) -> Result<()> {
        if let Some(context) = &self.context {
            context.is_valid()?;
        }
        if let Some(mechanism) = &self.mechanism {
            mechanism.is_valid()?;
        }
        Ok(())
    }

    /// Checks that the connection carries everything needed to splice it.
    pub fn is_complete(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(NsmError::Validation("connection id cannot be empty".to_string()));
        }
        if self.network_service.is_empty() {
            return Err(NsmError::Validation(format!(
                "connection {} network service cannot be empty",
                self.id
            )));
        }
        if self.mechanism.is_none() {
            return Err(NsmError::Validation(format!(
                "connection {} mechanism cannot be empty",
                self.id
            )));
        }
        self.is_valid()
    }

    /// Replaces the context, keeping the old one if the result would be invalid.
    pub fn update_context(&mut self, context: Option<ConnectionContext>) -> Result<()> {
        let new_context = context.unwrap_or_default();
        if let Some(current) = &self.context {
            new_context.meets_requirements(current)?;
        }
        let old = self.context.replace(new_context);
        if let Err(e) = self.is_valid() {
            self.context = old;
            return Err(e);
        }
        Ok(())
    }
}
