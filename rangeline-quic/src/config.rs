use std::sync::Arc;

use quinn_proto::{ClientConfig, EndpointConfig};

/// Configuration for a client [`QuicEndpoint`](crate::QuicEndpoint).
pub struct QuicConfig {
    /// Shared endpoint configuration (connection IDs, supported versions, etc.).
    pub endpoint_config: Arc<EndpointConfig>,
    /// TLS/QUIC parameters used for every outbound connection.
    pub client_config: ClientConfig,
    /// Maximum queued outgoing packets before dropping. Default: 1024.
    pub send_queue_capacity: usize,
    /// Allow path MTU discovery. Default: true.
    pub allow_mtud: bool,
    /// Deterministic RNG seed for testing. Default: `None` (random).
    pub rng_seed: Option<[u8; 32]>,
}

impl QuicConfig {
    /// Create a client config with the given TLS client configuration.
    pub fn new(client_config: ClientConfig) -> Self {
        Self {
            endpoint_config: Arc::new(EndpointConfig::default()),
            client_config,
            send_queue_capacity: 1024,
            allow_mtud: true,
            rng_seed: None,
        }
    }

    /// Pin the QUIC version offered in the first Initial packet.
    ///
    /// The endpoint only accepts connections on versions it lists as
    /// supported, so the version is registered there as well.
    pub fn with_version(mut self, version: u32) -> Self {
        let mut endpoint = EndpointConfig::default();
        endpoint.supported_versions(vec![version]);
        self.endpoint_config = Arc::new(endpoint);
        self.client_config.version(version);
        self
    }
}
