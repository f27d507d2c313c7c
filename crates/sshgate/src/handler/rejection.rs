//! Channel rejections.

use sshgate_wire::RejectionReason;
use thiserror::Error;

/// A backend's refusal to open a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({reason})")]
pub struct ChannelRejection {
    reason: RejectionReason,
    message: String,
}

impl ChannelRejection {
    /// Reject with a reason code and a message for the client.
    pub fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`.
    pub fn prohibited(message: impl Into<String>) -> Self {
        Self::new(RejectionReason::AdministrativelyProhibited, message)
    }

    /// `SSH_OPEN_CONNECT_FAILED`.
    pub fn connect_failed(message: impl Into<String>) -> Self {
        Self::new(RejectionReason::ConnectFailed, message)
    }

    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    pub fn unknown_channel_type(message: impl Into<String>) -> Self {
        Self::new(RejectionReason::UnknownChannelType, message)
    }

    /// `SSH_OPEN_RESOURCE_SHORTAGE`.
    pub fn resource_shortage(message: impl Into<String>) -> Self {
        Self::new(RejectionReason::ResourceShortage, message)
    }

    /// The reason code.
    #[must_use]
    pub const fn reason(&self) -> RejectionReason {
        self.reason
    }

    /// The message for the client.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
