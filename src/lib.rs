//! Paxseq is the consensus core of a replicated coordination log. It assigns a
//! total order to proposed values by running one instance of [Paxos][wikipedia]
//! per _slot_ of that order and delivers every learned `(slot, value)` pair to
//! a consumer.
//!
//! [wikipedia]: https://en.wikipedia.org/wiki/Paxos_(computer_science)
//!
//! # Usage
//!
//! A [`Manager`] is wired to two collaborators: a versioned [`Log`] from which
//! cluster membership is read and a [`Putter`] through which outbound messages
//! leave the process. The consumer of [`Manager::recv`] is expected to apply
//! each decision to the log, thereby advancing its version.
//!
//! ```
//! use std::sync::Arc;
//!
//! use paxseq::log::Mutation;
//! use paxseq::prototyping::MemLog;
//! use paxseq::putter::NullPutter;
//!
//! let log = Arc::new(MemLog::new());
//! let manager = paxseq::builder()
//!     .for_node("a")
//!     .reading_from(log.clone())
//!     .sending_via(NullPutter)
//!     .spawn_in(paxseq::executor::StdThread);
//!
//! log.apply(1, Mutation::member("a", "a.example:8046").encode().unwrap())
//!     .unwrap();
//!
//! let decided = futures::executor::block_on(manager.propose("hello")).unwrap();
//! assert_eq!(decided, b"hello");
//!
//! let decision = futures::executor::block_on(manager.recv()).unwrap();
//! assert_eq!(decision.slot, 2);
//! ```
//!
//! # Membership
//!
//! Membership is itself part of the replicated log: entries under a well-known
//! prefix map member ids to addresses. The members voting on slot `n` are those
//! committed as of log version `n - window` (see [`Config::window`]). Reading
//! them suspends the instance for slot `n` until the log has reached that
//! version, which is how later slots are gated on the effects of earlier ones.
//! Nothing about membership is cached on the manager.
//!
//! # Protocol
//!
//! Each slot runs classic single-decree Paxos with four message kinds.
//!
//! 1. Invite `(ballot)`
//!
//!    A coordinator picks a ballot that is higher than any it has observed for
//!    the slot and that no other member can pick, by placing its own ordinal in
//!    the low bits. It sends the invitation to every member, itself included.
//!
//! 2. Rsvp `(ballot, to, accepted)`
//!
//!    An acceptor that has not promised a higher ballot promises this one and
//!    replies to the inviting coordinator, reporting the value it accepted
//!    last, if any.
//!
//! 3. Nominate `(ballot, value)`
//!
//!    With a quorum of promises in hand, the coordinator nominates the value
//!    accepted under the highest ballot among them, falling back to its own
//!    candidate only if none was reported.
//!
//! 4. Vote `(ballot, value)`
//!
//!    An acceptor that has not promised a higher ballot accepts the nomination
//!    and broadcasts its vote. A learner that counts a quorum of votes for the
//!    same ballot and value has learned the slot's decision.
//!
//! Messages may be lost, duplicated or reordered. Acceptors and learners keep
//! only the highest ballot they have seen per sender, which makes replays
//! harmless, and coordinators retry with ever higher ballots until their slot
//! is decided.

#![warn(rust_2018_idioms)]
#![warn(clippy::wildcard_imports)]

pub mod config;
pub mod error;
pub mod executor;
pub mod instance;
pub mod log;
pub mod manager;
pub mod membership;
pub mod message;
pub mod prototyping;
pub mod putter;
pub mod retry;

pub use config::Config;
pub use error::ShutDown;
pub use instance::{InstanceHandle, RolePutters};
pub use log::Log;
pub use manager::{builder, Decision, Manager};
pub use membership::Membership;
pub use message::{Body, Message};
pub use putter::Putter;

/// Position in the replicated log. Slot `0` is never decided; messages that
/// carry it are bound to the next free slot.
pub type SlotNum = u64;

/// Round number within one slot's Paxos instance.
pub type Ballot = u64;

/// Position of a member within a slot's ordered member list.
pub type Ordinal = u32;

/// Version of the external log.
pub type Version = u64;

/// Opaque payload agreed upon for a slot.
pub type Value = Vec<u8>;
