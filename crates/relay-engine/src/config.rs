use std::net::SocketAddr;
use std::time::Duration;

use crate::error::EngineError;

/// Buffer size per direction when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Idle interval when none is configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest idle interval accepted; a zero timeout would turn the
/// readiness wait into a busy loop.
const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration of one forwarding engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address the listening socket binds to.
    pub listen: SocketAddr,
    /// Fixed target every accepted connection is relayed to.
    pub target: SocketAddr,
    /// Sessions with no traffic for this long are closed.
    pub idle_timeout: Duration,
    /// Capacity of each direction's buffer, in bytes.
    pub buffer_size: usize,
    /// Name used in log records for this engine.
    pub label: String,
}

impl EngineConfig {
    pub fn new(listen: SocketAddr, target: SocketAddr) -> Self {
        Self {
            listen,
            target,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            label: format!("{listen}->{target}"),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Clamp values the engine cannot run with.
    pub(crate) fn normalized(mut self) -> Self {
        self.buffer_size = self.buffer_size.max(1);
        self.idle_timeout = self.idle_timeout.max(MIN_IDLE_TIMEOUT);
        self
    }
}

/// Resolve `host:port` once, picking the first address returned.
pub async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr, EngineError> {
    let target = format!("{host}:{port}");
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| EngineError::Resolve {
            target: target.clone(),
            source,
        })?;
    addrs.next().ok_or(EngineError::NoAddress { target })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn defaults_match_constants() {
        let config = EngineConfig::new(addr("0.0.0.0:8080"), addr("10.0.0.1:80"));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(config.label, "0.0.0.0:8080->10.0.0.1:80");
    }

    #[test]
    fn normalized_clamps_degenerate_values() {
        let config = EngineConfig::new(addr("127.0.0.1:0"), addr("127.0.0.1:1"))
            .with_buffer_size(0)
            .with_idle_timeout(Duration::ZERO)
            .normalized();
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.idle_timeout, MIN_IDLE_TIMEOUT);
    }

    #[tokio::test]
    async fn resolves_literal_address() {
        let resolved = resolve_target("127.0.0.1", 9000).await.unwrap();
        assert_eq!(resolved, addr("127.0.0.1:9000"));
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let err = resolve_target("no-such-host.invalid", 80).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Resolve { .. } | EngineError::NoAddress { .. }
        ));
    }
}
