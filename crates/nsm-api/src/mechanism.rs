use crate::error::{NsmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a mechanism connects a local client or a remote manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MechanismClass {
    #[default]
    Local,
    Remote,
}

/// Well-known mechanism types and their parameter keys.
pub mod kernel {
    pub const MECHANISM: &str = "KERNEL";
    pub const INTERFACE_NAME: &str = "name";
    pub const NETNS_INODE: &str = "netnsInode";
}

pub mod memif {
    pub const MECHANISM: &str = "MEMIF";
    pub const SOCKET_FILENAME: &str = "socketfile";
}

pub mod vxlan {
    pub const MECHANISM: &str = "VXLAN";
    pub const SRC_IP: &str = "src_ip";
    pub const DST_IP: &str = "dst_ip";
    pub const VNI: &str = "vni";
}

pub mod srv6 {
    pub const MECHANISM: &str = "SRV6";
    /// Source binding segment identifier.
    pub const SRC_BSID: &str = "src_bsid";
    /// Source local segment identifier.
    pub const SRC_LOCAL_SID: &str = "src_local_sid";
    pub const DST_BSID: &str = "dst_bsid";
    pub const DST_LOCAL_SID: &str = "dst_local_sid";
}

/// A transport mechanism offered for, or selected on, one connection segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    pub cls: MechanismClass,
    #[serde(rename = "type")]
    pub mechanism_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Mechanism {
    pub fn new(cls: MechanismClass, mechanism_type: impl Into<String>) -> Self {
        Self {
            cls,
            mechanism_type: mechanism_type.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parameter value, with a missing key read as the empty string.
    pub fn parameter(&self, key: &str) -> &str {
        self.parameters.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn is_remote(&self) -> bool {
        self.cls == MechanismClass::Remote
    }

    pub fn is_valid(&self) -> Result<()> {
        if self.mechanism_type.is_empty() {
            return Err(NsmError::Validation(
                "mechanism type cannot be empty".to_string(),
            ));
        }
        if self.mechanism_type == srv6::MECHANISM && self.cls == MechanismClass::Remote {
            for key in [srv6::SRC_BSID, srv6::SRC_LOCAL_SID] {
                if self.parameter(key).is_empty() {
                    return Err(NsmError::Validation(format!(
                        "srv6 mechanism requires parameter {}",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Returns the first mechanism of the given type.
pub fn find_mechanism<'a>(mechanisms: &'a [Mechanism], mechanism_type: &str) -> Option<&'a Mechanism> {
    mechanisms.iter().find(|m| m.mechanism_type == mechanism_type)
}
