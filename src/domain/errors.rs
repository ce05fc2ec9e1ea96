use thiserror::Error;

/// Errors raised by the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection failed: {reason}")]
    Connection { reason: String },

    #[error("Consumer group '{group}' missing on stream '{stream}'")]
    NoGroup { stream: String, group: String },

    #[error("Malformed stream entry on '{stream}': {reason}")]
    Malformed { stream: String, reason: String },
}

/// Errors raised by the exchange adapter.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Exchange API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Exchange transport error: {reason}")]
    Transport { reason: String },

    #[error("Exchange authentication failed: {reason}")]
    Auth { reason: String },
}
