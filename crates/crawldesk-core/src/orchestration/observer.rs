use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::TaskSnapshot;

/// Receives the full task list after every registry mutation. Called while
/// the registry lock is held: implementations must return quickly and must
/// not call back into the engine.
pub trait TaskObserver<I>: Send + Sync {
    fn on_tasks_changed(&self, tasks: &[TaskSnapshot<I>]);
}

pub struct NoopObserver;

impl<I> TaskObserver<I> for NoopObserver {
    fn on_tasks_changed(&self, _tasks: &[TaskSnapshot<I>]) {}
}

pub type SnapshotBatch<I> = Arc<Vec<TaskSnapshot<I>>>;

/// Fans snapshots out over a tokio broadcast channel. Slow receivers lag and
/// skip to the newest state, which is fine since every message is complete.
pub struct BroadcastObserver<I> {
    sender: broadcast::Sender<SnapshotBatch<I>>,
}

impl<I: Send + Sync + 'static> BroadcastObserver<I> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotBatch<I>> {
        self.sender.subscribe()
    }
}

impl<I: Clone + Send + Sync + 'static> TaskObserver<I> for BroadcastObserver<I> {
    fn on_tasks_changed(&self, tasks: &[TaskSnapshot<I>]) {
        // No receivers is not an error.
        let _ = self.sender.send(Arc::new(tasks.to_vec()));
    }
}
