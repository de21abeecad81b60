use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::TestPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    PhaseEnd(TestPhase),
    AttachStatus,
    PingRefresh,
    /// Deadline for the termination acknowledgement with this sequence number.
    AckTimeout(u64),
    StatusTail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub epoch: u64,
    pub timer: Timer,
}

/// The set of pending deferred actions. Cancelling drops all of them at once; any
/// firing that was already queued carries an old epoch and is ignored by the owner.
pub struct TimerScope {
    tasks: JoinSet<()>,
    epoch: u64,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerScope {
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tasks: JoinSet::new(),
            epoch: 0,
            tx,
        }
    }

    pub fn after(&mut self, delay: Duration, timer: Timer) {
        let fired = TimerFired {
            epoch: self.epoch,
            timer,
        };
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });
    }

    pub fn every(&mut self, period: Duration, timer: Timer) {
        let fired = TimerFired {
            epoch: self.epoch,
            timer,
        };
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx.send(fired).is_err() {
                    return;
                }
            }
        });
    }

    pub fn cancel_all(&mut self) {
        self.tasks.abort_all();
        self.tasks = JoinSet::new();
        self.epoch += 1;
    }

    pub fn is_current(&self, fired: &TimerFired) -> bool {
        fired.epoch == self.epoch
    }

    pub fn pending(&mut self) -> usize {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.len()
    }
}
