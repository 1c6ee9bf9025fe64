use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub type TimerCallback = Box<dyn FnOnce() -> TimerFuture + Send>;

/// Cancel side of an armed one-shot timer. Dropping the handle leaves the
/// timer armed.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Source of one-shot deferred callbacks. Implementations must not poll the
/// callback's future from inside `arm`.
pub trait TimerDriver: Send + Sync {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> OrchestrationResult<TimerHandle>;
}

/// Timers as tokio tasks sleeping on the runtime clock, cancelled by abort.
pub struct TokioTimerDriver;

impl TimerDriver for TokioTimerDriver {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> OrchestrationResult<TimerHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("cannot arm timer outside a tokio runtime: {error}"),
            )
        })?;

        let join_handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        });
        let abort_handle = join_handle.abort_handle();

        Ok(TimerHandle::new(move || abort_handle.abort()))
    }
}
