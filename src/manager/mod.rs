//! The [`Manager`] maps slots to Paxos instances.

mod builder;
pub(crate) mod cursor;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;
use futures::stream::StreamExt;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::{InstanceError, LogError, ProposeError, ShutDown};
use crate::executor::Executor;
use crate::instance::{self, InstanceHandle, RolePutters, Shared};
use crate::log::Log;
use crate::membership::Resolver;
use crate::message::{Body, Message};
use crate::putter::Putter;
use crate::{SlotNum, Value, Version};

pub use builder::{
    ManagerBuilderBlank, ManagerBuilderWithAll, ManagerBuilderWithId, ManagerBuilderWithIdAndLog,
};
use cursor::Cursor;

/// Returns a basic [`ManagerBuilder`][ManagerBuilderBlank].
///
/// ```
/// # use std::sync::Arc;
/// # let log = Arc::new(paxseq::prototyping::MemLog::new());
/// # let executor = futures::executor::ThreadPool::new().unwrap();
/// let manager = paxseq::builder()
///     .for_node("a")
///     .reading_from(log)
///     .sending_via(paxseq::putter::NullPutter)
///     .expecting_cluster_size(3)
///     .spawn_in(executor);
/// # assert_eq!(manager.self_id(), "a");
/// ```
pub fn builder() -> ManagerBuilderBlank {
    ManagerBuilderBlank::new()
}

/// A value learned for a slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    pub slot: SlotNum,
    pub value: Value,
}

/// Entry point of the consensus core.
///
/// A manager lazily creates one instance per slot it hears of, be it through
/// a local proposal or an inbound message, and funnels the decisions of all
/// of them into [`recv`][Manager::recv].
///
/// Managers are cheap to clone; all clones share the same instances.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    resolver: Resolver,
    cursor: Arc<Cursor>,
    egress: Arc<dyn Putter>,
    executor: Arc<dyn Executor>,
    table: Mutex<Table>,
    decisions: futures::lock::Mutex<mpsc::UnboundedReceiver<Decision>>,
}

struct Table {
    instances: BTreeMap<SlotNum, InstanceHandle>,
    /// Slots below the floor were decided, applied and forgotten.
    floor: SlotNum,
    /// `None` once the manager was shut down.
    shared: Option<Arc<Shared>>,
}

impl Manager {
    /// Creates a manager with the given collaborators.
    ///
    /// [`builder()`][crate::builder()] offers a more convenient way to do the
    /// same.
    pub fn new<P: Putter, E: Executor>(
        config: Config,
        log: Arc<dyn Log>,
        putter: P,
        executor: E,
    ) -> Self {
        Self::from_parts(config, log, Arc::new(putter), Arc::new(executor))
    }

    pub(crate) fn from_parts(
        config: Config,
        log: Arc<dyn Log>,
        egress: Arc<dyn Putter>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let resolver = Resolver::new(
            log,
            &config.members_prefix,
            config.window,
            config.cluster_size_hint,
        );
        let cursor = Arc::new(Cursor::new(config.start_slot));
        let (sender, receiver) = mpsc::unbounded();

        let shared = Arc::new(Shared {
            self_id: config.self_id.clone(),
            resolver: resolver.clone(),
            retry: config.retry.clone(),
            cursor: Arc::clone(&cursor),
            decisions: sender,
        });

        info!(
            "Starting manager for node {} at slot {}.",
            config.self_id,
            cursor.peek(resolver.log().version())
        );

        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                cursor,
                egress,
                executor,
                table: Mutex::new(Table {
                    instances: BTreeMap::new(),
                    floor: 0,
                    shared: Some(shared),
                }),
                decisions: futures::lock::Mutex::new(receiver),
            }),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.inner.config.self_id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The slot the next local proposal will go to, barring concurrent ones.
    pub fn cursor(&self) -> SlotNum {
        self.inner.cursor.peek(self.log_version())
    }

    /// Proposes `value` for the next free slot.
    ///
    /// Resolves with the value the slot was decided on. That is `value` unless
    /// another member got a different value accepted for the same slot first,
    /// in which case the caller is expected to propose again.
    pub async fn propose(&self, value: impl Into<Value>) -> Result<Value, ProposeError> {
        let slot = self.inner.cursor.claim(self.log_version());
        let (_, instance) = self.instance(slot)?;

        debug!("Proposing a value for slot {}.", slot);

        let decided = instance.propose(value.into())?;

        decided.await.map_err(|_| ProposeError::ShutDown)
    }

    /// Waits for the next decision, in the order decisions were made.
    ///
    /// Fails once the manager was shut down and all decisions made before that
    /// have been received.
    pub async fn recv(&self) -> Result<Decision, ShutDown> {
        let mut decisions = self.inner.decisions.lock().await;

        decisions.next().await.ok_or(ShutDown)
    }

    /// Hands an inbound message to its slot's instance.
    ///
    /// Invalid messages and messages for forgotten slots or slots more than
    /// [`Config::max_lookahead`] past the log version are dropped. A slot of
    /// `0` stands for the current [`cursor`][Manager::cursor].
    pub fn put(&self, msg: Message) {
        self.route(None, msg);
    }

    /// Like [`put`][Manager::put], but the message's sender is replaced by the
    /// ordinal `addr` has among the slot's members. Messages from addresses
    /// that aren't members are dropped.
    pub fn put_from(&self, addr: &str, msg: Message) {
        self.route(Some(addr), msg);
    }

    /// Decodes `frame` and [puts][Manager::put] the result.
    pub fn put_frame(&self, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(msg) => self.put(msg),
            Err(err) => debug!("Dropped a frame of {} bytes: {}.", frame.len(), err),
        }
    }

    /// Decodes `frame` and [puts][Manager::put_from] the result.
    pub fn put_frame_from(&self, addr: &str, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(msg) => self.put_from(addr, msg),
            Err(err) => debug!(
                "Dropped a frame of {} bytes from {}: {}.",
                frame.len(),
                addr,
                err
            ),
        }
    }

    /// The addresses an outbound message should be sent to.
    ///
    /// That is the inviting coordinator for an `Rsvp` and every member of the
    /// message's slot otherwise, the local node included.
    pub async fn addrs_for(&self, msg: &Message) -> Result<Vec<String>, LogError> {
        let slot = match msg.slot {
            0 => self.cursor(),
            slot => slot,
        };

        let membership = self.inner.resolver.resolve(slot).await?;

        Ok(match msg.body {
            Body::Rsvp { to, .. } => membership
                .addr_of(to)
                .map(|addr| vec![addr.to_owned()])
                .unwrap_or_default(),
            Body::Invite { .. } | Body::Nominate { .. } | Body::Vote { .. } => membership.addrs(),
        })
    }

    /// Looks up the instance for `slot`, creating it if necessary.
    ///
    /// A `slot` of `0` stands for the current [`cursor`][Manager::cursor],
    /// which is left as is. The slot actually used is returned alongside the
    /// handle.
    pub fn instance(&self, slot: SlotNum) -> Result<(SlotNum, InstanceHandle), InstanceError> {
        let log_version = self.log_version();
        let mut table = self.inner.lock_table();

        let shared = match &table.shared {
            Some(shared) => Arc::clone(shared),
            None => return Err(InstanceError::ShutDown),
        };

        let slot = match slot {
            0 => self.inner.cursor.peek(log_version),
            slot => slot,
        };

        if slot < table.floor {
            return Err(InstanceError::Forgotten(slot));
        }

        if let Some(handle) = table.instances.get(&slot) {
            return Ok((slot, handle.clone()));
        }

        let putters = RolePutters::uniform(Arc::clone(&self.inner.egress));
        let handle = instance::spawn(slot, shared, putters, &*self.inner.executor)?;

        table.instances.insert(slot, handle.clone());
        self.prune(&mut table, log_version);

        Ok((slot, handle))
    }

    /// Stops all instances.
    ///
    /// Pending proposals fail, further messages are dropped and the putter is
    /// closed. Decisions made up to this point can still be received.
    pub fn shut_down(&self) {
        let (instances, shared) = {
            let mut table = self.inner.lock_table();

            (
                std::mem::take(&mut table.instances),
                table.shared.take(),
            )
        };

        if shared.is_none() {
            return;
        }

        info!("Shutting down manager for node {}.", self.self_id());

        for handle in instances.values() {
            handle.close();
        }

        self.inner.egress.close();
    }

    fn route(&self, from: Option<&str>, msg: Message) {
        if let Err(err) = msg.validate() {
            debug!("Dropped an invalid {:?}: {}.", msg.kind(), err);
            return;
        }

        let horizon = self
            .log_version()
            .saturating_add(self.inner.config.max_lookahead);

        if msg.slot > horizon {
            debug!(
                "Dropped a {:?} for slot {}, beyond slot {}.",
                msg.kind(),
                msg.slot,
                horizon
            );
            return;
        }

        match self.instance(msg.slot) {
            Ok((_, instance)) => match from {
                Some(addr) => instance.put_from(addr, msg),
                None => instance.put(msg),
            },
            Err(err) => debug!("Dropped a {:?} for slot {}: {}.", msg.kind(), msg.slot, err),
        }
    }

    fn prune(&self, table: &mut Table, log_version: Version) {
        let retain = self.inner.config.retain_decided;
        let cursor = self.inner.cursor.peek(log_version);

        while table.instances.len() as u64 > retain {
            let prunable = match table.instances.iter().next() {
                Some((&slot, handle)) => (handle.is_decided()
                    && slot <= log_version
                    && slot.saturating_add(retain) <= cursor)
                    .then(|| slot),
                None => None,
            };

            let slot = match prunable {
                Some(slot) => slot,
                None => break,
            };

            if let Some(handle) = table.instances.remove(&slot) {
                handle.close();
            }

            table.floor = slot + 1;
            trace!("Pruned instance for slot {}.", slot);
        }
    }

    fn log_version(&self) -> Version {
        self.inner.resolver.log().version()
    }
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("self_id", &self.inner.config.self_id)
            .field("resolver", &self.inner.resolver)
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}
