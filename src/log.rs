//! Defines the [`Log`] collaborator and the mutations membership is made of.

use std::sync::Arc;

use async_trait::async_trait;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError, LogError};
use crate::message::MAX_FRAME_LEN;
use crate::Version;

/// Path prefix under which membership entries live by default.
pub const MEMBERS_PREFIX: &str = "/members";

/// Path of the membership entry for member `id` under `prefix`.
pub fn member_path(prefix: &str, id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), id)
}

/// The versioned store decisions are applied to.
///
/// The consensus core only ever reads from the log. Writing to it is the
/// business of whoever consumes [`Manager::recv`][crate::Manager::recv].
#[async_trait]
pub trait Log: Send + Sync + 'static {
    /// Version of the most recently applied mutation, `0` for an empty log.
    fn version(&self) -> Version;

    /// Resolves once the log has reached `version`, yielding its state as of
    /// exactly that version.
    async fn wait_for(&self, version: Version) -> Result<Arc<dyn Snapshot>, LogError>;
}

/// The state of a [`Log`] at one version.
pub trait Snapshot: Send + Sync {
    fn version(&self) -> Version;

    /// All entries whose path starts with `prefix`, ordered by path.
    fn entries_under(&self, prefix: &str) -> Vec<(String, Vec<u8>)>;
}

/// A change to the log's state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Set { path: String, value: Vec<u8> },
    Del { path: String },
}

impl Mutation {
    pub fn set(path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Mutation::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Adds member `id`, reachable at `addr`, under the default prefix.
    pub fn member(id: &str, addr: &str) -> Self {
        Self::set(member_path(MEMBERS_PREFIX, id), addr)
    }

    /// Encodes the mutation as a frame for the log.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::DefaultOptions::new()
            .serialize(self)
            .map_err(EncodeError)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        bincode::DefaultOptions::new()
            .with_limit(MAX_FRAME_LEN)
            .reject_trailing_bytes()
            .deserialize(frame)
            .map_err(DecodeError::Malformed)
    }
}
