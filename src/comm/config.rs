use crate::agent::config::parse_env_var;
use crate::comm::error::CommInitError;
use std::net::SocketAddr;

/// Comm module configuration
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Listen address (default: 0.0.0.0)
    pub listen_addr: String,
    /// Listen port (default: 9800)
    pub listen_port: u16,
    /// Maximum payload size in bytes (default: 65536)
    pub max_payload_bytes: usize,
    /// Deduplication table capacity per client (default: 256)
    pub dedup_capacity: usize,
    /// Deduplication entry TTL in seconds (default: 300)
    pub dedup_ttl_secs: u64,
    /// How long a request may take before the client gets a timeout (default: 310)
    pub response_timeout_secs: u64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 9800,
            max_payload_bytes: 65536,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
            response_timeout_secs: 310,
        }
    }
}

impl CommConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = CommConfig::default();
        config.listen_addr = parse_env_var("FEDSIM_LISTEN_ADDR", config.listen_addr);
        config.listen_port = parse_env_var("FEDSIM_LISTEN_PORT", config.listen_port);
        config
    }

    /// Returns the socket address to bind to
    pub fn bind_addr(&self) -> Result<SocketAddr, CommInitError> {
        let addr = format!("{}:{}", self.listen_addr, self.listen_port);
        addr.parse().map_err(|_| CommInitError::InvalidAddress(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr() {
        let mut config = CommConfig::default();
        assert_eq!(config.bind_addr().unwrap().port(), 9800);

        config.listen_addr = "not an address".to_string();
        assert!(matches!(config.bind_addr(), Err(CommInitError::InvalidAddress(_))));
    }
}
