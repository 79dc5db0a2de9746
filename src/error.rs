use thiserror::Error;

use crate::{SlotNum, Version};

/// Error type of the executor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The manager was shut down.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("manager is shut down")]
pub struct ShutDown;

/// A frame could not be turned into a [`Message`][crate::Message].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame")]
    Malformed(#[source] bincode::Error),

    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

/// Serializing a message or mutation failed.
#[derive(Debug, Error)]
#[error("failed to encode")]
pub struct EncodeError(#[source] pub(crate) bincode::Error);

/// A read from or write to the log failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LogError {
    #[error("log is closed")]
    Closed,

    #[error("version {given} does not follow {current}")]
    OutOfOrder { current: Version, given: Version },
}

/// An instance could not be looked up or created.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The slot was decided, applied and its instance discarded.
    #[error("slot {0} is below the retention floor")]
    Forgotten(SlotNum),

    #[error("failed to spawn instance task")]
    Spawn(#[source] BoxError),

    #[error("manager is shut down")]
    ShutDown,
}

impl From<ShutDown> for InstanceError {
    fn from(_: ShutDown) -> Self {
        InstanceError::ShutDown
    }
}

/// Proposing a value failed.
#[derive(Debug, Error)]
pub enum ProposeError {
    #[error("instance unavailable")]
    Instance(#[from] InstanceError),

    /// The instance went away before deciding, either because the manager was
    /// shut down or because the log it reads membership from was closed.
    #[error("manager is shut down")]
    ShutDown,
}

impl From<ShutDown> for ProposeError {
    fn from(_: ShutDown) -> Self {
        ProposeError::ShutDown
    }
}
