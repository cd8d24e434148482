use waypoint_core::protocol::ProtocolError;

/// Errors surfaced to the developer integrating the SDK.
///
/// End users never see these; evaluation problems degrade silently and are
/// only logged.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("You must call waypoint.init() first")]
    NotInitialized,

    #[error("waypoint.init() was already called")]
    AlreadyInitialized,

    #[error("You must call waypoint.identify() first")]
    NotIdentified,

    #[error("Invalid SDK configuration: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("The SDK has shut down")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<ProtocolError> for SdkError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
