use crate::error::{NsmError, Result};
use serde::{Deserialize, Serialize};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpContext {
    #[serde(default)]
    pub src_ip_addr: String,
    #[serde(default)]
    pub dst_ip_addr: String,
    #[serde(default)]
    pub src_ip_required: bool,
    #[serde(default)]
    pub dst_ip_required: bool,
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub dns_server_ips: Vec<String>,
    pub search_domains: Vec<String>,
}

/// Addressing and naming context negotiated for a connection.
///
/// Equality treats an absent IP context the same as an empty one, so a
/// context that was only initialised by a retry compares equal to the one it
/// came from.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub ip_context: Option<IpContext>,
    #[serde(default)]
    pub dns_configs: Vec<DnsConfig>,
    #[serde(default)]
    pub extra_context: HashMap<String, String>,
}

impl PartialEq for ConnectionContext {
    fn eq(&self, other: &Self) -> bool {
        let empty = IpContext::default();
        self.ip_context.as_ref().unwrap_or(&empty) == other.ip_context.as_ref().unwrap_or(&empty)
            && self.dns_configs == other.dns_configs
            && self.extra_context == other.extra_context
    }
}

impl ConnectionContext {
    pub fn is_empty(&self) -> bool {
        *self == ConnectionContext::default()
    }

    pub fn is_valid(&self) -> Result<()> {
        let Some(ip) = &self.ip_context else {
            return Ok(());
        };
        for addr in [&ip.src_ip_addr, &ip.dst_ip_addr] {
            if !addr.is_empty() {
                parse_prefix(addr)?;
            }
        }
        for prefix in &ip.excluded_prefixes {
            parse_prefix(prefix)?;
        }
        Ok(())
    }

    /// Checks that this context provides everything `current` requires.
    pub fn meets_requirements(&self, current: &ConnectionContext) -> Result<()> {
        self.is_valid()?;
        let Some(required) = &current.ip_context else {
            return Ok(());
        };
        let ip = self.ip_context.clone().unwrap_or_default();
        if required.src_ip_required && ip.src_ip_addr.is_empty() {
            return Err(NsmError::Validation(
                "connection context requires a source ip address".to_string(),
            ));
        }
        if required.dst_ip_required && ip.dst_ip_addr.is_empty() {
            return Err(NsmError::Validation(
                "connection context requires a destination ip address".to_string(),
            ));
        }
        Ok(())
    }
}

/// Equality of two optional contexts where absent and empty are the same.
pub fn same_context(a: Option<&ConnectionContext>, b: Option<&ConnectionContext>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (Some(c), None) | (None, Some(c)) => c.is_empty(),
        (None, None) => true,
    }
}

/// Accepts an address with a prefix length, or a bare address.
fn parse_prefix(value: &str) -> Result<()> {
    if value.parse::<IpNet>().is_ok() || value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    Err(NsmError::Validation(format!("invalid ip address or prefix: {}", value)))
}
