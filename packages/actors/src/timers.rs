//! Spawned timer tasks that post messages back to the actor.

use std::time::Duration;

use ractor::ActorRef;
use tokio::task::JoinHandle;

use crate::messages::ReconcilerMessage;

/// Holds at most one spawned task. Replacing or cancelling aborts it.
#[derive(Debug, Default)]
pub(crate) struct TaskSlot(Option<JoinHandle<()>>);

impl TaskSlot {
    /// A task is set and has not finished yet.
    pub(crate) fn is_armed(&self) -> bool {
        self.0.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub(crate) fn set(&mut self, handle: JoinHandle<()>) {
        self.cancel();
        self.0 = Some(handle);
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Send `message` to `actor` after `delay`.
pub(crate) fn after(
    delay: Duration,
    actor: ActorRef<ReconcilerMessage>,
    message: ReconcilerMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = actor.send_message(message);
    })
}

/// Send a fresh message to `actor` every `period`, first one after `period`.
pub(crate) fn every(
    period: Duration,
    actor: ActorRef<ReconcilerMessage>,
    message: fn() -> ReconcilerMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            interval.tick().await;
            if actor.send_message(message()).is_err() {
                break;
            }
        }
    })
}
