/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the socket failed (DNS, TCP, TLS or the upgrade itself).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The socket is already closed.
    #[error("socket closed")]
    Closed,
}
