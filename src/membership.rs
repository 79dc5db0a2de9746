//! Derives the voting membership of a slot from the log.

use std::sync::Arc;

use futures::future::FutureExt;
use tracing::{trace, warn};

use crate::error::LogError;
use crate::log::{Log, Snapshot};
use crate::{Ordinal, SlotNum, Version};

/// A membership entry: the member's id and the address it is reached at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Member {
    pub id: String,
    pub addr: String,
}

/// The members voting on one slot, in ordinal order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Membership {
    version: Version,
    members: Vec<Member>,
    /// Stand-in size used while the log holds no members yet.
    size_hint: usize,
}

impl Membership {
    pub fn new(version: Version, members: Vec<Member>, size_hint: usize) -> Self {
        Self {
            version,
            members,
            size_hint,
        }
    }

    fn from_snapshot(snapshot: &dyn Snapshot, prefix: &str, size_hint: usize) -> Self {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));

        let members = snapshot
            .entries_under(&prefix)
            .into_iter()
            .filter_map(|(path, addr)| {
                let id = path.strip_prefix(prefix.as_str())?.to_owned();

                match String::from_utf8(addr) {
                    Ok(addr) => Some(Member { id, addr }),
                    Err(_) => {
                        warn!("Skipping member {} with a non UTF-8 address.", id);
                        None
                    }
                }
            })
            .collect();

        Self::new(snapshot.version(), members, size_hint)
    }

    /// Log version this membership was read at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Members in ordinal order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Whether the log held no members at [`version`][Self::version].
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of voters, the size hint standing in for an empty membership.
    pub fn size(&self) -> usize {
        if self.members.is_empty() {
            self.size_hint
        } else {
            self.members.len()
        }
    }

    /// Smallest number of voters that makes a majority.
    pub fn quorum(&self) -> usize {
        self.size() / 2 + 1
    }

    /// Member addresses in ordinal order.
    pub fn addrs(&self) -> Vec<String> {
        self.members.iter().map(|m| m.addr.clone()).collect()
    }

    /// Address of the member at `ordinal`.
    pub fn addr_of(&self, ordinal: Ordinal) -> Option<&str> {
        self.members
            .get(ordinal as usize)
            .map(|m| m.addr.as_str())
    }

    /// Ordinal of the member reached at `addr`.
    pub fn ordinal_of_addr(&self, addr: &str) -> Option<Ordinal> {
        self.members
            .iter()
            .position(|m| m.addr == addr)
            .map(|p| p as Ordinal)
    }

    /// Ordinal of the member with id `id`.
    pub fn ordinal_of_id(&self, id: &str) -> Option<Ordinal> {
        self.members
            .iter()
            .position(|m| m.id == id)
            .map(|p| p as Ordinal)
    }

    /// Ordinal of the local node `id`.
    ///
    /// While the log holds no members and a single voter is expected, the
    /// local node is that voter. With a larger hint, ordinals cannot be told
    /// apart before the membership is committed, so there is none.
    pub fn ordinal_of_self(&self, id: &str) -> Option<Ordinal> {
        if self.members.is_empty() && self.size_hint == 1 {
            return Some(0);
        }

        self.ordinal_of_id(id)
    }

    /// Whether votes from `ordinal` count towards a quorum.
    pub fn admits(&self, ordinal: Ordinal) -> bool {
        (ordinal as usize) < self.size()
    }
}

/// Reads the membership for a slot out of the log.
#[derive(Clone)]
pub struct Resolver {
    log: Arc<dyn Log>,
    prefix: Arc<str>,
    window: u64,
    size_hint: usize,
}

impl Resolver {
    pub fn new(log: Arc<dyn Log>, prefix: &str, window: u64, size_hint: usize) -> Self {
        Self {
            log,
            prefix: prefix.into(),
            window,
            size_hint,
        }
    }

    /// The log version whose state defines the membership of `slot`.
    pub fn version_for(&self, slot: SlotNum) -> Version {
        slot.saturating_sub(self.window)
    }

    /// The log memberships are read from.
    pub fn log(&self) -> &Arc<dyn Log> {
        &self.log
    }

    /// Waits for the log to reach the slot's membership version.
    pub async fn resolve(&self, slot: SlotNum) -> Result<Membership, LogError> {
        let version = self.version_for(slot);

        if self.log.version() < version {
            trace!(
                "Slot {} waits for log version {} (at {}).",
                slot,
                version,
                self.log.version()
            );
        }

        let snapshot = self.log.wait_for(version).await?;

        Ok(Membership::from_snapshot(
            &*snapshot,
            &self.prefix,
            self.size_hint,
        ))
    }

    /// Like [`resolve`][Self::resolve] but gives up instead of waiting.
    pub fn try_resolve(&self, slot: SlotNum) -> Option<Result<Membership, LogError>> {
        self.resolve(slot).now_or_never()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("prefix", &self.prefix)
            .field("window", &self.window)
            .field("size_hint", &self.size_hint)
            .finish()
    }
}
