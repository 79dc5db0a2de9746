//! Defines the [`Executor`] trait and a thread-per-task implementation.

use futures::future::BoxFuture;
use futures::task::FutureObj;

use crate::error::BoxError;

/// Runs the task that drives an instance.
pub trait Executor: Send + Sync + 'static {
    /// Executes the given task.
    fn execute(&self, task: BoxFuture<'static, ()>) -> Result<(), BoxError>;
}

impl<S: futures::task::Spawn + Send + Sync + 'static> Executor for S {
    fn execute(&self, task: BoxFuture<'static, ()>) -> Result<(), BoxError> {
        self.spawn_obj(FutureObj::from(task))
            .map_err(|e| Box::new(e) as BoxError)
    }
}

/// Executor which spawns a new thread for each task.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdThread;

impl Executor for StdThread {
    fn execute(&self, task: BoxFuture<'static, ()>) -> Result<(), BoxError> {
        std::thread::Builder::new()
            .name("paxseq-instance".to_owned())
            .spawn(|| {
                futures::executor::block_on(task);
            })
            .map(|_| ())
            .map_err(|e| Box::new(e) as BoxError)
    }
}
