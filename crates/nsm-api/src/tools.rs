use crate::error::{NsmError, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::info;

/// Environment variable that switches transports to insecure mode.
pub const INSECURE_ENV: &str = "INSECURE";
const INSECURE_DEFAULT: bool = false;

/// Reads an environment variable as a boolean, falling back to `default` when unset.
///
/// Accepts `1`, `t`, `true`, `0`, `f` and `false`, lower, upper or title case.
pub fn read_env_bool(env: &str, default: bool) -> Result<bool> {
    match std::env::var(env) {
        Ok(value) if !value.is_empty() => parse_bool(&value)
            .ok_or_else(|| NsmError::InvalidConfig(format!("{}={} is not a boolean", env, value))),
        _ => Ok(default),
    }
}

pub fn is_insecure() -> Result<bool> {
    read_env_bool(INSECURE_ENV, INSECURE_DEFAULT).map_err(|e| {
        NsmError::InvalidConfig(format!("unable to clarify secure or insecure mode: {}", e))
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Polls `addr` until it accepts a TCP connection or `timeout` elapses.
pub async fn wait_for_port_available(addr: &str, timeout: Duration, idle_sleep: Duration) -> Result<()> {
    info!("Waiting for liveness probe: tcp:{}", addr);
    let deadline = Instant::now() + timeout;
    let mut last_report = Instant::now();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(NsmError::Timeout(format!("timeout waiting for: tcp:{}", addr)));
        }
        if let Ok(Ok(_stream)) = tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
            return Ok(());
        }
        if last_report.elapsed() > Duration::from_secs(60) {
            info!("Waiting for liveness probe: tcp:{}", addr);
            last_report = Instant::now();
        }
        tokio::time::sleep(idle_sleep.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}
