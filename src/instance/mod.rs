//! A single slot's Paxos instance.
//!
//! Every instance is driven by one task that owns the slot's coordinator,
//! acceptor and learner. Everything that happens to the instance arrives as
//! an [`Inbound`] item over an unbounded channel, which lets the manager hand
//! off work without ever blocking.

mod acceptor;
mod coordinator;
mod learner;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::{mpsc, oneshot};
use futures::future::{self, Either, FutureExt};
use futures::stream::StreamExt;
use futures_timer::Delay;
use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

use crate::error::{InstanceError, ShutDown};
use crate::executor::Executor;
use crate::manager::cursor::Cursor;
use crate::manager::Decision;
use crate::membership::{Membership, Resolver};
use crate::message::{Body, Message};
use crate::putter::Putter;
use crate::retry::RetryConfig;
use crate::{Ordinal, SlotNum, Value};

use acceptor::Acceptor;
use coordinator::Coordinator;
use learner::Learner;

/// The putters an instance's roles emit their messages through.
#[derive(Clone)]
pub struct RolePutters {
    /// Carries `Invite` and `Nominate`.
    pub coordinator: Arc<dyn Putter>,
    /// Carries `Rsvp` and `Vote`.
    pub acceptor: Arc<dyn Putter>,
    /// Carries votes a decided instance sends to lagging peers.
    pub learner: Arc<dyn Putter>,
}

impl RolePutters {
    /// Routes all roles through `putter`.
    pub fn uniform(putter: Arc<dyn Putter>) -> Self {
        Self {
            coordinator: Arc::clone(&putter),
            acceptor: Arc::clone(&putter),
            learner: putter,
        }
    }
}

impl std::fmt::Debug for RolePutters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolePutters").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug)]
enum Role {
    Coordinator,
    Acceptor,
    Learner,
}

pub(crate) enum Inbound {
    Message(Message),
    MessageFrom(String, Message),
    Propose {
        value: Value,
        reply: oneshot::Sender<Value>,
    },
    Putters(RolePutters),
}

/// State shared by all instances of a manager.
pub(crate) struct Shared {
    pub self_id: String,
    pub resolver: Resolver,
    pub retry: RetryConfig,
    pub cursor: Arc<Cursor>,
    pub decisions: mpsc::UnboundedSender<Decision>,
}

impl Shared {
    fn publish(&self, slot: SlotNum, value: Value) {
        self.cursor.advance_past(slot);

        if self
            .decisions
            .unbounded_send(Decision { slot, value })
            .is_err()
        {
            trace!("Decision for slot {} has no receiver.", slot);
        }
    }
}

/// A handle to a slot's instance.
///
/// Handles are cheap to clone. Once the manager has dropped its own handle,
/// because it was shut down or the slot was pruned, all operations on the
/// handle become no-ops.
#[derive(Clone, Debug)]
pub struct InstanceHandle {
    slot: SlotNum,
    sender: mpsc::UnboundedSender<Inbound>,
    decided: Arc<AtomicBool>,
}

impl InstanceHandle {
    pub fn slot(&self) -> SlotNum {
        self.slot
    }

    /// Whether the slot was decided. Lags the decision by a little.
    pub fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }

    /// Delivers `msg` to the instance as is.
    pub fn put(&self, msg: Message) {
        self.send(Inbound::Message(msg.in_slot(self.slot)));
    }

    /// Delivers `msg` with its sender replaced by the ordinal `addr` has in
    /// the slot's membership.
    pub fn put_from(&self, addr: &str, msg: Message) {
        self.send(Inbound::MessageFrom(addr.to_owned(), msg.in_slot(self.slot)));
    }

    /// Substitutes the putters the instance emits through.
    pub fn set_putters(&self, putters: RolePutters) {
        self.send(Inbound::Putters(putters));
    }

    pub(crate) fn propose(&self, value: Value) -> Result<oneshot::Receiver<Value>, ShutDown> {
        let (reply, receiver) = oneshot::channel();

        self.sender
            .unbounded_send(Inbound::Propose { value, reply })
            .map_err(|_| ShutDown)?;

        Ok(receiver)
    }

    /// Stops the instance once it has worked through what it was sent.
    pub(crate) fn close(&self) {
        self.sender.close_channel();
    }

    fn send(&self, inbound: Inbound) {
        if self.sender.unbounded_send(inbound).is_err() {
            trace!("Instance for slot {} is gone.", self.slot);
        }
    }
}

pub(crate) fn spawn(
    slot: SlotNum,
    shared: Arc<Shared>,
    putters: RolePutters,
    executor: &dyn Executor,
) -> Result<InstanceHandle, InstanceError> {
    let (sender, receiver) = mpsc::unbounded();
    let decided = Arc::new(AtomicBool::new(false));

    executor
        .execute(run(slot, shared, putters, Arc::clone(&decided), receiver).boxed())
        .map_err(InstanceError::Spawn)?;

    trace!("Spawned instance for slot {}.", slot);

    Ok(InstanceHandle {
        slot,
        sender,
        decided,
    })
}

async fn run(
    slot: SlotNum,
    shared: Arc<Shared>,
    putters: RolePutters,
    decided: Arc<AtomicBool>,
    mut inbox: mpsc::UnboundedReceiver<Inbound>,
) {
    let mut backlog = Vec::new();

    // Whatever arrives before the membership is known has to wait for it.
    let membership = {
        let resolve = shared.resolver.resolve(slot);
        futures::pin_mut!(resolve);

        loop {
            match future::select(&mut resolve, inbox.next()).await {
                Either::Left((Ok(membership), _)) => break membership,
                Either::Left((Err(err), _)) => {
                    warn!("Slot {} failed to resolve its membership: {}.", slot, err);
                    return;
                }
                Either::Right((Some(inbound), _)) => backlog.push(inbound),
                Either::Right((None, _)) => return,
            }
        }
    };

    let mut instance = Instance::new(slot, shared, putters, membership, decided);

    for inbound in backlog {
        instance.accept(inbound);
    }

    instance.run(&mut inbox).await;

    trace!("Instance for slot {} stopped.", slot);
}

enum Event {
    Inbound(Inbound),
    Timeout,
    Closed,
}

struct Instance {
    slot: SlotNum,
    shared: Arc<Shared>,
    putters: RolePutters,
    membership: Membership,
    me: Option<Ordinal>,

    coordinator: Coordinator,
    acceptor: Acceptor,
    learner: Learner,

    timer: Option<Delay>,
    waiters: Vec<oneshot::Sender<Value>>,
    decided: Arc<AtomicBool>,

    /// Messages addressed to the local node, awaiting delivery.
    local: VecDeque<Message>,
}

impl Instance {
    fn new(
        slot: SlotNum,
        shared: Arc<Shared>,
        putters: RolePutters,
        membership: Membership,
        decided: Arc<AtomicBool>,
    ) -> Self {
        let me = membership.ordinal_of_self(&shared.self_id);
        let coordinator = Coordinator::new(slot, shared.retry.policy());

        Self {
            slot,
            shared,
            putters,
            membership,
            me,
            coordinator,
            acceptor: Acceptor::default(),
            learner: Learner::default(),
            timer: None,
            waiters: Vec::new(),
            decided,
            local: VecDeque::new(),
        }
    }

    async fn run(&mut self, inbox: &mut mpsc::UnboundedReceiver<Inbound>) {
        loop {
            let event = match self.timer.as_mut() {
                Some(timer) => match future::select(inbox.next(), timer).await {
                    Either::Left((Some(inbound), _)) => Event::Inbound(inbound),
                    Either::Left((None, _)) => Event::Closed,
                    Either::Right(_) => Event::Timeout,
                },
                None => match inbox.next().await {
                    Some(inbound) => Event::Inbound(inbound),
                    None => Event::Closed,
                },
            };

            match event {
                Event::Inbound(inbound) => self.accept(inbound),
                Event::Timeout => self.on_timeout(),
                Event::Closed => return,
            }
        }
    }

    fn accept(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message(msg) => self.local.push_back(msg),
            Inbound::MessageFrom(addr, mut msg) => match self.membership.ordinal_of_addr(&addr) {
                Some(ordinal) => {
                    msg.sender = ordinal;
                    self.local.push_back(msg);
                }
                None => debug!(
                    "Slot {} dropped a {:?} from unknown address {}.",
                    self.slot,
                    msg.kind(),
                    addr
                ),
            },
            Inbound::Propose { value, reply } => self.propose(value, reply),
            Inbound::Putters(putters) => self.putters = putters,
        }

        self.drain();
    }

    fn propose(&mut self, value: Value, reply: oneshot::Sender<Value>) {
        if let Some((_, decided)) = self.learner.decided() {
            let _ = reply.send(decided.clone());
            return;
        }

        self.waiters.push(reply);

        if self.coordinator.propose(value) {
            self.start_round();
        }
    }

    fn on_timeout(&mut self) {
        self.timer = None;

        if !self.coordinator.is_active() {
            return;
        }

        debug!(
            "Slot {} timed out at ballot {:?}, retrying.",
            self.slot,
            self.coordinator.ballot()
        );

        self.start_round();
        self.drain();
    }

    fn start_round(&mut self) {
        match self.me {
            Some(me) => {
                let (invite, interval) = self.coordinator.start_round(me);
                trace!(
                    "Slot {} invites for ballot {:#x}.",
                    self.slot,
                    invite.ballot()
                );

                self.timer = Some(Delay::new(interval));
                self.emit(Role::Coordinator, invite);
            }
            // The membership of a slot never changes, so there is nothing to
            // retry. Proposals wait for votes from the actual members.
            None => debug!(
                "Node {} is not a member for slot {}, waiting for its decision.",
                self.shared.self_id, self.slot
            ),
        }
    }

    fn drain(&mut self) {
        while let Some(msg) = self.local.pop_front() {
            for (role, reply) in self.handle(msg) {
                self.emit(role, reply);
            }
        }
    }

    fn handle(&mut self, msg: Message) -> SmallVec<[(Role, Message); 1]> {
        let mut out = SmallVec::new();

        if self.membership.admits(msg.sender) {
            self.coordinator.observe(msg.ballot());
        }

        if self.learner.decided().is_some() {
            out.extend(
                self.learner
                    .catch_up(&msg, self.me)
                    .map(|vote| (Role::Learner, vote)),
            );

            return out;
        }

        match msg.body {
            Body::Invite { .. } | Body::Nominate { .. } => out.extend(
                self.acceptor
                    .handle(&msg, self.me)
                    .map(|reply| (Role::Acceptor, reply)),
            ),
            Body::Rsvp { .. } => {
                if let Some(me) = self.me {
                    out.extend(
                        self.coordinator
                            .handle_rsvp(&msg, me, &self.membership)
                            .map(|nomination| (Role::Coordinator, nomination)),
                    );
                }
            }
            Body::Vote { .. } => {
                if let Some((ballot, value)) = self.learner.handle(&msg, &self.membership) {
                    info!(
                        "Slot {} decided at ballot {:#x}.",
                        self.slot, ballot
                    );
                    self.decide(value);
                }
            }
        }

        out
    }

    fn decide(&mut self, value: Value) {
        self.coordinator.finish();
        self.timer = None;
        self.decided.store(true, Ordering::Release);

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(value.clone());
        }

        self.shared.publish(self.slot, value);
    }

    fn emit(&mut self, role: Role, msg: Message) {
        let putter = match role {
            Role::Coordinator => &self.putters.coordinator,
            Role::Acceptor => &self.putters.acceptor,
            Role::Learner => &self.putters.learner,
        };

        putter.put(&msg);

        let to_self = match msg.body {
            Body::Rsvp { to, .. } => Some(to) == self.me,
            _ => self.me.is_some(),
        };

        if to_self {
            self.local.push_back(msg);
        }
    }
}
