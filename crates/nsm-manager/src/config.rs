use nsm_api::tools::is_insecure;
use nsm_api::{NsmError, Result};
use std::time::Duration;

/// Host name used for the forwarder service name.
pub const HOST_ENV: &str = "NSMGR_HOST";
/// Timeout in seconds for forwarder request and close calls.
pub const FORWARDER_TIMEOUT_ENV: &str = "NSMGR_FORWARDER_TIMEOUT_SECS";

const DEFAULT_HOST: &str = "localhost";

/// Bounds for calls into a forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Bound on a forwarder `request` call.
    ///
    /// Default: 15s
    pub request_timeout: Duration,
    /// Bound on a forwarder `close` call.
    ///
    /// Default: 15s
    pub close_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Host this manager runs on; forwarders register as `forwarder@<host>`.
    pub host: String,
    pub insecure: bool,
    pub forwarder: ForwarderConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            insecure: false,
            forwarder: ForwarderConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// The network service local forwarders register under.
    pub fn forwarder_service_name(&self) -> String {
        format!("forwarder@{}", self.host)
    }

    /// Builds the configuration from `NSMGR_HOST`, `NSMGR_FORWARDER_TIMEOUT_SECS`
    /// and `INSECURE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.insecure = is_insecure()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.is_empty()) {
            config.host = host;
        }
        if let Some(raw) = lookup(FORWARDER_TIMEOUT_ENV).filter(|v| !v.is_empty()) {
            let secs: u64 = raw.parse().map_err(|_| {
                NsmError::InvalidConfig(format!("{}={} is not a number of seconds", FORWARDER_TIMEOUT_ENV, raw))
            })?;
            if secs == 0 {
                return Err(NsmError::InvalidConfig(format!("{} must be positive", FORWARDER_TIMEOUT_ENV)));
            }
            config.forwarder.request_timeout = Duration::from_secs(secs);
            config.forwarder.close_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
