//! Defines the [`Putter`] trait, the seam between instances and the transport.

use std::sync::Arc;

use futures::channel::mpsc;

use crate::message::Message;

/// Sink for outbound messages.
///
/// A putter decides where a message goes by asking
/// [`Manager::addrs_for`][crate::Manager::addrs_for]. Messages addressed to
/// the local node have already been delivered by the time they are handed to
/// a putter, so transports should not loop them back. Duplicates are harmless
/// but wasteful.
///
/// Putters are shared by all instances and must tolerate concurrent use.
pub trait Putter: Send + Sync + 'static {
    fn put(&self, msg: &Message);

    /// Called once when the manager shuts down.
    fn close(&self) {}
}

impl<P: Putter + ?Sized> Putter for Arc<P> {
    fn put(&self, msg: &Message) {
        (**self).put(msg)
    }

    fn close(&self) {
        (**self).close()
    }
}

impl Putter for mpsc::UnboundedSender<Message> {
    fn put(&self, msg: &Message) {
        let _ = self.unbounded_send(msg.clone());
    }

    fn close(&self) {
        self.close_channel();
    }
}

/// Drops every message. Sufficient for a single member cluster.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPutter;

impl Putter for NullPutter {
    fn put(&self, _msg: &Message) {}
}
