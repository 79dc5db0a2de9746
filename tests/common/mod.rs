#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, Either, FutureExt};

use paxseq::log::{Log, Mutation};
use paxseq::message::Message;
use paxseq::prototyping::{MemLog, RecordingPutter};
use paxseq::{Decision, Manager};

pub const PATIENCE: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn member(id: &str, addr: &str) -> Vec<u8> {
    Mutation::member(id, addr).encode().unwrap()
}

/// A log whose first version makes the given `(id, addr)` pairs members.
///
/// Members are added one per version, so the log ends up at the version
/// equal to the number of members.
pub fn log_with_members(members: &[(&str, &str)]) -> Arc<MemLog> {
    let log = Arc::new(MemLog::new());

    for (version, (id, addr)) in (1..).zip(members) {
        log.apply(version, member(id, addr)).unwrap();
    }

    log
}

/// A manager for node `a` that is the sole member of its cluster as of
/// version 1.
pub fn single_node() -> (Arc<MemLog>, Manager, RecordingPutter) {
    let log = log_with_members(&[("a", "x")]);
    let putter = RecordingPutter::new();

    let manager = paxseq::builder()
        .for_node("a")
        .reading_from(log.clone())
        .sending_via(putter.clone())
        .spawn_in(pool());

    (log, manager, putter)
}

pub fn pool() -> futures::executor::ThreadPool {
    futures::executor::ThreadPool::new().unwrap()
}

/// Resolves to `None` if `f` takes longer than `timeout`.
pub async fn within<F: Future + Unpin>(timeout: Duration, f: F) -> Option<F::Output> {
    match future::select(f, futures_timer::Delay::new(timeout)).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

pub fn block_on_within<F: Future>(f: F) -> F::Output {
    futures::executor::block_on(within(PATIENCE, f.boxed_local())).expect("timed out")
}

/// Whether `f` is still pending after a short while.
pub fn stays_pending<F: Future>(f: F) -> bool {
    futures::executor::block_on(within(Duration::from_millis(200), f.boxed_local())).is_none()
}

pub fn recv(manager: &Manager) -> Decision {
    block_on_within(manager.recv()).unwrap()
}

/// Waits until `putter` has recorded a message matching `pred`, returning it.
pub fn await_sent(putter: &RecordingPutter, pred: impl Fn(&Message) -> bool) -> Message {
    let mut seen = Vec::new();

    block_on_within(async {
        loop {
            seen.extend(putter.take());

            if let Some(msg) = seen.iter().find(|m| pred(m)) {
                return msg.clone();
            }

            futures_timer::Delay::new(Duration::from_millis(5)).await;
        }
    })
}

/// Applies decisions to a log in slot order, buffering those that arrive
/// early.
pub struct Applier {
    log: Arc<MemLog>,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl Applier {
    pub fn new(log: Arc<MemLog>) -> Self {
        Self {
            log,
            pending: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, decision: Decision) {
        self.pending.insert(decision.slot, decision.value);

        loop {
            let next = self.log.version() + 1;

            match self.pending.remove(&next) {
                Some(value) => self.log.apply(next, value).unwrap(),
                None => break,
            }
        }
    }
}
