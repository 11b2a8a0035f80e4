use thiserror::Error;

/// A line could not be handed to the output channel
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct DeliveryError {
    pub reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Output channel for notifications and command replies
pub trait OutputSink: Send + Sync {
    /// Send one line to `target`. Fire-and-forget: success only means
    /// the line was accepted.
    fn send(&self, target: &str, line: &str) -> Result<(), DeliveryError>;

    /// Whether `target` can currently receive lines (e.g. the channel is
    /// joined). Repositories with no accepted target are not polled.
    fn accepts(&self, _target: &str) -> bool {
        true
    }
}
