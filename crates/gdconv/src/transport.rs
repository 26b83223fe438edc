//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between the controller and the
//! conversion worker.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about requests, responses or
//!   promise ids. It moves opaque buffers.
//! - **Message-Oriented**: one `send` is one `recv` on the other end. There is
//!   no request/response pairing at this layer; the bridge does that.

/// Errors that occur at the channel layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The other context is gone or the channel was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional message channel between two execution contexts.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Posts one message to the other side.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next message from the other side.
    ///
    /// Returns `Ok(None)` once the other side has hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
