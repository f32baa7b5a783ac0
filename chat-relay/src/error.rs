use std::net::SocketAddr;

/// Failures that can surface while servicing a single session.
///
/// Everything here is recovered at the connection-worker boundary; none of
/// these abort the server. Listener-level failures are reported separately
/// as `anyhow::Error` from the server entry points.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The referenced session is no longer in the registry.
    #[error("session not found: {0}")]
    NotFound(SocketAddr),

    /// A write toward one peer failed or timed out. Other deliveries in the
    /// same batch are unaffected.
    #[error("delivery to {peer} failed: {reason}")]
    DeliveryFailure { peer: SocketAddr, reason: String },

    /// An inbound frame exceeded the configured size limit.
    #[error("message exceeds {limit} bytes")]
    OversizedMessage { limit: usize },

    /// A datagram arrived from an unidentified source with an empty payload.
    #[error("empty datagram from unidentified peer {0}")]
    IdentificationMissing(SocketAddr),

    /// The per-session audit log could not be allocated.
    #[error("unable to allocate session resources: {0}")]
    ResourceUnavailable(#[from] std::io::Error),
}
