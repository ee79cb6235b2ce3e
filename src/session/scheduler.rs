//! Transition scheduler.
//!
//! Owns at most one pending timer. Timers never touch the store directly:
//! when one elapses it sends a [`TimerFired`] back to the hub, which applies
//! it through [`SessionStore::fire`](super::store::SessionStore::fire). The
//! generation carried by the timer lets the store drop a fire that lost a
//! race with a manual trigger or reset.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::phase::Phase;

/// Step a timer performs when it elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledStep {
    /// Rupture → transmutation.
    Transmute,
    /// Transmutation → waiting.
    Reset,
}

impl ScheduledStep {
    /// Phase the store must still be in for this step to apply.
    #[must_use]
    pub const fn armed_in(self) -> Phase {
        match self {
            Self::Transmute => Phase::Rupture,
            Self::Reset => Phase::Transmutation,
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transmute => "transmute",
            Self::Reset => "reset",
        }
    }
}

/// Request to arm a timer, produced by a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    /// What to do when the timer elapses.
    pub step: ScheduledStep,
    /// Store generation at the time of arming.
    pub generation: u64,
    /// How long to wait.
    pub delay: Duration,
}

/// Message sent back to the hub when a timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Step to apply.
    pub step: ScheduledStep,
    /// Generation the timer was armed with.
    pub generation: u64,
}

struct PendingTimer {
    step: ScheduledStep,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Single-slot timer owner.
pub struct TransitionScheduler {
    pending: Option<PendingTimer>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TransitionScheduler {
    /// Creates a scheduler and the receiver its timers report to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: None,
                fired_tx,
            },
            fired_rx,
        )
    }

    /// Arms a timer, replacing any pending one.
    ///
    /// Re-arming the exact same step and generation is a no-op, so the
    /// timer keeps its original deadline.
    pub fn arm(&mut self, request: TimerRequest) {
        if let Some(pending) = &self.pending
            && pending.step == request.step
            && pending.generation == request.generation
            && !pending.handle.is_finished()
        {
            return;
        }
        self.cancel();

        let tx = self.fired_tx.clone();
        let TimerRequest {
            step,
            generation,
            delay,
        } = request;
        debug!(step = step.as_str(), generation, ?delay, "timer armed");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the hub is shutting down.
            let _ = tx.send(TimerFired { step, generation });
        });
        self.pending = Some(PendingTimer {
            step,
            generation,
            handle,
        });
    }

    /// Drops the pending timer if it was armed for an older generation.
    pub fn sync(&mut self, current_generation: u64) {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.generation != current_generation)
        {
            self.cancel();
        }
    }

    /// Aborts the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                step = pending.step.as_str(),
                generation = pending.generation,
                "timer cancelled"
            );
            pending.handle.abort();
        }
    }
}

impl Drop for TransitionScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TransitionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionScheduler")
            .field("pending", &self.pending.as_ref().map(|p| (p.step, p.generation)))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn pending_step(scheduler: &TransitionScheduler) -> Option<ScheduledStep> {
        scheduler.pending.as_ref().map(|p| p.step)
    }

    fn request(step: ScheduledStep, generation: u64, secs: u64) -> TimerRequest {
        TimerRequest {
            step,
            generation,
            delay: Duration::from_secs(secs),
        }
    }

    #[test]
    fn steps_know_their_phase() {
        assert_eq!(ScheduledStep::Transmute.armed_in(), Phase::Rupture);
        assert_eq!(ScheduledStep::Reset.armed_in(), Phase::Transmutation);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (mut scheduler, mut rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Transmute, 1, 3));

        tokio::time::advance(Duration::from_millis(2900)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            TimerFired {
                step: ScheduledStep::Transmute,
                generation: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_pending_timer() {
        let (mut scheduler, mut rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Transmute, 1, 3));
        scheduler.arm(request(ScheduledStep::Reset, 2, 10));
        assert_eq!(pending_step(&scheduler), Some(ScheduledStep::Reset));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(rx.try_recv().unwrap().step, ScheduledStep::Reset);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn same_request_keeps_deadline() {
        let (mut scheduler, mut rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Transmute, 4, 3));
        tokio::time::advance(Duration::from_secs(2)).await;
        scheduler.arm(request(ScheduledStep::Transmute, 4, 3));

        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(rx.try_recv().unwrap().generation, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_cancels_stale_generation() {
        let (mut scheduler, mut rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Transmute, 1, 3));
        scheduler.sync(2);
        assert_eq!(pending_step(&scheduler), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_keeps_current_generation() {
        let (mut scheduler, _rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Reset, 3, 10));
        scheduler.sync(3);
        assert_eq!(pending_step(&scheduler), Some(ScheduledStep::Reset));
    }

    #[tokio::test]
    async fn drop_aborts_timer() {
        let (mut scheduler, mut rx) = TransitionScheduler::new();
        scheduler.arm(request(ScheduledStep::Reset, 1, 3600));
        drop(scheduler);
        // Sender side is gone once the aborted task is dropped.
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("receiver should close after drop");
        assert!(got.is_none());
    }
}
