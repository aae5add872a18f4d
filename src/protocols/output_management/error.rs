use std::fmt;

/// Interface a [`ProtocolError`] is posted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorInterface {
    Configuration,
    ConfigurationHead,
}

/// Configuration head slot that can only be written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mode,
    Position,
    Transform,
    Scale,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Mode => "mode",
            Field::Position => "position",
            Field::Transform => "transform",
            Field::Scale => "scale",
        })
    }
}

/// Client misbehavior. Posting one of these terminates the client connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("head {0:?} has already been configured")]
    AlreadyConfiguredHead(String),
    #[error("unconfigured head {0:?}")]
    UnconfiguredHead(String),
    #[error("configuration has already been used")]
    AlreadyUsed,
    #[error("{0} has already been set")]
    AlreadySet(Field),
    #[error("mode doesn't belong to head")]
    InvalidMode,
    #[error("invalid custom mode {width}x{height}@{refresh}")]
    InvalidCustomMode {
        width: i32,
        height: i32,
        refresh: i32,
    },
    #[error("invalid transform {0}")]
    InvalidTransform(i32),
    #[error("invalid scale {0}")]
    InvalidScale(f64),
}

impl ProtocolError {
    pub fn interface(&self) -> ErrorInterface {
        match self {
            ProtocolError::AlreadyConfiguredHead(_)
            | ProtocolError::UnconfiguredHead(_)
            | ProtocolError::AlreadyUsed => ErrorInterface::Configuration,
            _ => ErrorInterface::ConfigurationHead,
        }
    }

    /// Error code from the protocol XML for the interface in [`Self::interface`].
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::AlreadyConfiguredHead(_) => 1,
            ProtocolError::UnconfiguredHead(_) => 2,
            ProtocolError::AlreadyUsed => 3,
            ProtocolError::AlreadySet(_) => 1,
            ProtocolError::InvalidMode => 2,
            ProtocolError::InvalidCustomMode { .. } => 3,
            ProtocolError::InvalidTransform(_) => 4,
            ProtocolError::InvalidScale(_) => 5,
        }
    }
}
