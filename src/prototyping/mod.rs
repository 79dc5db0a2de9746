//! In-process stand-ins for the log and the transport.
//!
//! [`MemLog`] and [`DirectNetwork`] are enough to run a cluster of managers
//! inside a single process, which is what the test suite does. Neither is
//! meant for production use.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::future::FutureExt;
use rand::Rng;
use tracing::{trace, warn};

use crate::error::LogError;
use crate::executor::Executor;
use crate::log::{Log, Mutation, Snapshot};
use crate::message::Message;
use crate::putter::Putter;
use crate::{Manager, Version};

type Waiter = oneshot::Sender<Result<Arc<MemSnapshot>, LogError>>;

/// A log that lives in memory and keeps every version it ever had.
#[derive(Debug)]
pub struct MemLog {
    inner: Mutex<MemLogInner>,
}

#[derive(Debug)]
struct MemLogInner {
    version: Version,
    history: BTreeMap<Version, Arc<MemSnapshot>>,
    waiters: BTreeMap<Version, Vec<Waiter>>,
    closed: bool,
}

/// The state of a [`MemLog`] as of one version.
#[derive(Debug)]
pub struct MemSnapshot {
    version: Version,
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemLog {
    pub fn new() -> Self {
        let initial = Arc::new(MemSnapshot {
            version: 0,
            entries: BTreeMap::new(),
        });

        Self {
            inner: Mutex::new(MemLogInner {
                version: 0,
                history: std::iter::once((0, initial)).collect(),
                waiters: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    /// Applies `frame` as version `version`.
    ///
    /// Frames that don't decode as a [`Mutation`] still advance the version.
    pub fn apply(&self, version: Version, frame: impl AsRef<[u8]>) -> Result<(), LogError> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(LogError::Closed);
        }

        if version <= inner.version {
            return Err(LogError::OutOfOrder {
                current: inner.version,
                given: version,
            });
        }

        let mut entries = inner
            .at(inner.version)
            .map(|snapshot| snapshot.entries.clone())
            .unwrap_or_default();

        match Mutation::decode(frame.as_ref()) {
            Ok(Mutation::Set { path, value }) => {
                entries.insert(path, value);
            }
            Ok(Mutation::Del { path }) => {
                entries.remove(&path);
            }
            Err(_) => trace!("Version {} carries no mutation.", version),
        }

        inner.version = version;
        inner
            .history
            .insert(version, Arc::new(MemSnapshot { version, entries }));

        let pending = inner.waiters.split_off(&(version + 1));
        let ready = std::mem::replace(&mut inner.waiters, pending);

        // Skipped versions see the state before `version`, as later reads do.
        for (waited, waiters) in ready {
            let result = inner.at(waited).ok_or(LogError::Closed);

            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }

        Ok(())
    }

    /// Fails all current and future waits for versions not yet reached.
    pub fn close(&self) {
        let mut inner = self.lock();

        inner.closed = true;

        for (_, waiters) in std::mem::take(&mut inner.waiters) {
            for waiter in waiters {
                let _ = waiter.send(Err(LogError::Closed));
            }
        }
    }

    /// The state as of `version`, if the log has reached it.
    pub fn snapshot(&self, version: Version) -> Option<Arc<MemSnapshot>> {
        let inner = self.lock();

        if version > inner.version {
            return None;
        }

        inner.at(version)
    }

    fn lock(&self) -> MutexGuard<'_, MemLogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLogInner {
    /// Versions that were skipped share the state of the one before them.
    fn at(&self, version: Version) -> Option<Arc<MemSnapshot>> {
        self.history
            .range(..=version)
            .next_back()
            .map(|(_, snapshot)| Arc::clone(snapshot))
    }
}

#[async_trait]
impl Log for MemLog {
    fn version(&self) -> Version {
        self.lock().version
    }

    async fn wait_for(&self, version: Version) -> Result<Arc<dyn Snapshot>, LogError> {
        let receiver = {
            let mut inner = self.lock();

            if version <= inner.version {
                return match inner.at(version) {
                    Some(snapshot) => Ok(snapshot as Arc<dyn Snapshot>),
                    None => Err(LogError::Closed),
                };
            }

            if inner.closed {
                return Err(LogError::Closed);
            }

            let (sender, receiver) = oneshot::channel();
            inner.waiters.entry(version).or_default().push(sender);

            receiver
        };

        match receiver.await {
            Ok(result) => result.map(|snapshot| snapshot as Arc<dyn Snapshot>),
            Err(_) => Err(LogError::Closed),
        }
    }
}

impl Snapshot for MemSnapshot {
    fn version(&self) -> Version {
        self.version
    }

    fn entries_under(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.entries
            .range(prefix.to_owned()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }
}

impl MemSnapshot {
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }
}

/// How a [`DirectNetwork`] mistreats the messages it carries.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Characteristics {
    /// Probability of a message copy being dropped.
    pub packet_loss: f32,
    /// Probability of a message being delivered twice.
    pub duplication: f32,
    /// Upper bound of the uniformly distributed delivery delay.
    pub max_delay: Duration,
}

/// Connects managers living in the same process.
///
/// Every manager registers under its address and sends through the putter
/// obtained from [`putter_for`][DirectNetwork::putter_for]. Messages are
/// encoded, subjected to the network's [`Characteristics`] and delivered with
/// [`Manager::put_frame_from`].
#[derive(Clone)]
pub struct DirectNetwork {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    managers: Mutex<HashMap<String, Manager>>,
    characteristics: Mutex<Characteristics>,
    executor: Arc<dyn Executor>,
}

impl DirectNetwork {
    pub fn new<E: Executor>(executor: E) -> Self {
        Self::with_characteristics(executor, Characteristics::default())
    }

    pub fn with_characteristics<E: Executor>(
        executor: E,
        characteristics: Characteristics,
    ) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                managers: Mutex::new(HashMap::new()),
                characteristics: Mutex::new(characteristics),
                executor: Arc::new(executor),
            }),
        }
    }

    pub fn set_characteristics(&self, characteristics: Characteristics) {
        *self.inner.lock_characteristics() = characteristics;
    }

    /// Makes `manager` reachable at `addr`.
    pub fn register(&self, addr: impl Into<String>, manager: Manager) {
        self.inner.lock_managers().insert(addr.into(), manager);
    }

    /// Makes `addr` unreachable, as if the node had crashed.
    pub fn unregister(&self, addr: &str) -> Option<Manager> {
        self.inner.lock_managers().remove(addr)
    }

    pub fn addrs(&self) -> Vec<String> {
        let mut addrs: Vec<_> = self.inner.lock_managers().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Creates the putter for the manager registered under `addr`.
    pub fn putter_for(&self, addr: impl Into<String>) -> DirectPutter {
        DirectPutter {
            network: Arc::downgrade(&self.inner),
            from: addr.into(),
        }
    }
}

impl std::fmt::Debug for DirectNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectNetwork")
            .field("addrs", &self.addrs())
            .field("characteristics", &*self.inner.lock_characteristics())
            .finish()
    }
}

impl NetworkInner {
    fn lock_managers(&self) -> MutexGuard<'_, HashMap<String, Manager>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_characteristics(&self) -> MutexGuard<'_, Characteristics> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn manager(&self, addr: &str) -> Option<Manager> {
        self.lock_managers().get(addr).cloned()
    }
}

/// The [`Putter`] handed out by a [`DirectNetwork`].
#[derive(Clone, Debug)]
pub struct DirectPutter {
    network: Weak<NetworkInner>,
    from: String,
}

impl Putter for DirectPutter {
    fn put(&self, msg: &Message) {
        let network = match self.network.upgrade() {
            Some(network) => network,
            None => return,
        };

        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Failed to encode {:?}: {}.", msg.kind(), err);
                return;
            }
        };

        let task = deliver(Arc::clone(&network), self.from.clone(), msg.clone(), frame);

        if let Err(err) = network.executor.execute(task.boxed()) {
            warn!("Failed to spawn delivery task: {}.", err);
        }
    }
}

impl std::fmt::Debug for NetworkInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkInner").finish_non_exhaustive()
    }
}

async fn deliver(network: Arc<NetworkInner>, from: String, msg: Message, frame: Vec<u8>) {
    let sender = match network.manager(&from) {
        Some(sender) => sender,
        None => return,
    };

    let addrs = match sender.addrs_for(&msg).await {
        Ok(addrs) => addrs,
        Err(err) => {
            trace!("No destinations for {:?}: {}.", msg.kind(), err);
            return;
        }
    };

    let characteristics = *network.lock_characteristics();
    let frame: Arc<[u8]> = frame.into();

    let copies = addrs
        .into_iter()
        .filter(|addr| *addr != from)
        .flat_map(|addr| {
            let copies = if roll(characteristics.duplication) { 2 } else { 1 };
            std::iter::repeat(addr).take(copies)
        })
        .filter(|_| !roll(characteristics.packet_loss))
        .map(|addr| {
            let network = Arc::clone(&network);
            let from = from.clone();
            let frame = Arc::clone(&frame);
            let delay = delay(characteristics.max_delay);

            async move {
                if !delay.is_zero() {
                    futures_timer::Delay::new(delay).await;
                }

                match network.manager(&addr) {
                    Some(receiver) => receiver.put_frame_from(&from, &frame),
                    None => trace!("No manager at {}.", addr),
                }
            }
        });

    futures::future::join_all(copies).await;
}

fn roll(rate: f32) -> bool {
    rate > 0.0 && rand::thread_rng().gen::<f32>() < rate
}

fn delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;

    if max_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// A [`Putter`] that records what it is handed.
#[derive(Clone, Debug, Default)]
pub struct RecordingPutter {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingPutter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all messages recorded so far.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Putter for RecordingPutter {
    fn put(&self, msg: &Message) {
        self.lock().push(msg.clone());
    }
}
