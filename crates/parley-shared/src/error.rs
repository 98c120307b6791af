use thiserror::Error;

/// Failures of a call against the remote message log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure, timeout, or a 5xx from the service. Retried on the
    /// next poll tick.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote refused a create because an equivalent record exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected by remote: {0}")]
    Validation(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// Whether polling the channel that produced this error should stop.
    pub fn stops_polling(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unauthorized(_))
    }
}

/// Input rejected locally, before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message text is empty")]
    EmptyText,

    #[error("Channel name is empty")]
    EmptyName,

    #[error("Username is empty")]
    EmptyUsername,

    #[error("Username may not contain {0:?}")]
    ReservedCharacter(char),

    #[error("Direct conversations cannot take more members")]
    DirectMembership,

    #[error("No channel is active")]
    NoActiveChannel,

    #[error("No user is signed in")]
    NoSession,

    #[error("Cannot send a friend request to yourself")]
    SelfRequest,

    #[error("Cannot open a direct conversation with yourself")]
    SelfDirect,

    #[error("Friend request is already resolved")]
    RequestAlreadyResolved,

    #[error("Unknown friend request")]
    UnknownRequest,
}
