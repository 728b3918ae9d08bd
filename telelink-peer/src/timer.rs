use crate::transport::TransportEpoch;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Deadlines the session reacts to. Every event is tagged with the transport
/// epoch it was armed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    RoleArrival,
    RoleConfirm,
    ResetGrace,
    Heartbeat,
}

/// Posts timer events back into the session loop.
#[derive(Debug, Clone)]
pub struct TimerSink {
    epoch: TransportEpoch,
    tx: mpsc::UnboundedSender<(TransportEpoch, TimerEvent)>,
}

impl TimerSink {
    pub fn new(epoch: TransportEpoch, tx: mpsc::UnboundedSender<(TransportEpoch, TimerEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn after(&self, delay: Duration, event: TimerEvent) -> ScheduledTask {
        let sink = self.clone();
        ScheduledTask(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sink.tx.send((sink.epoch, event));
        }))
    }

    pub fn every(&self, period: Duration, event: TimerEvent) -> ScheduledTask {
        let sink = self.clone();
        ScheduledTask(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if sink.tx.send((sink.epoch, event)).is_err() {
                    break;
                }
            }
        }))
    }
}

/// A pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct ScheduledTask(JoinHandle<()>);

impl ScheduledTask {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
