use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

pub const DEFAULT_QUESTION_SECONDS: u32 = 30;

/// Emitted by a running countdown. `epoch` identifies the question view the
/// countdown was started for, so signals queued before a stop can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick { epoch: u64, remaining: u32 },
    Expired { epoch: u64 },
}

impl TimerSignal {
    pub fn epoch(&self) -> u64 {
        match self {
            TimerSignal::Tick { epoch, .. } | TimerSignal::Expired { epoch } => *epoch,
        }
    }
}

/// Per-question countdown. At most one tick task is alive at a time.
#[derive(Debug)]
pub struct CountdownTimer {
    duration_secs: u32,
    remaining_secs: u32,
    epoch: Option<u64>,
    signal_tx: mpsc::Sender<TimerSignal>,
    task: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    pub fn new(duration_secs: u32, signal_tx: mpsc::Sender<TimerSignal>) -> Self {
        let duration_secs = duration_secs.max(1);
        Self {
            duration_secs,
            remaining_secs: duration_secs,
            epoch: None,
            signal_tx,
            task: None,
        }
    }

    /// Cancels any running countdown and starts a fresh one for `epoch`.
    pub fn start(&mut self, epoch: u64) {
        self.stop();
        self.remaining_secs = self.duration_secs;
        self.epoch = Some(epoch);
        self.task = Some(tokio::spawn(run_countdown(
            epoch,
            self.duration_secs,
            self.signal_tx.clone(),
        )));
        tracing::trace!(timer.epoch = epoch, timer.seconds = self.duration_secs, "Countdown started");
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::trace!(timer.epoch = ?self.epoch, "Countdown stopped");
        }
        self.epoch = None;
    }

    pub fn reset(&mut self) {
        self.stop();
        self.remaining_secs = self.duration_secs;
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == Some(epoch)
    }

    /// Mirrors a tick into the handle. Returns false for ticks from a
    /// countdown that is no longer current.
    pub fn apply_tick(&mut self, epoch: u64, remaining: u32) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.remaining_secs = remaining;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_secs
    }

    pub fn duration(&self) -> u32 {
        self.duration_secs
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_countdown(epoch: u64, duration_secs: u32, signal_tx: mpsc::Sender<TimerSignal>) {
    let period = Duration::from_secs(1);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut remaining = duration_secs;
    while remaining > 0 {
        interval.tick().await;
        remaining -= 1;
        if signal_tx
            .send(TimerSignal::Tick { epoch, remaining })
            .await
            .is_err()
        {
            return;
        }
    }
    let _ = signal_tx.send(TimerSignal::Expired { epoch }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_every_second_then_expires() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut timer = CountdownTimer::new(3, tx);
        timer.start(7);
        assert!(timer.is_active());

        let started = Instant::now();
        let mut signals = Vec::new();
        while let Some(signal) = rx.recv().await {
            signals.push(signal);
            if matches!(signal, TimerSignal::Expired { .. }) {
                break;
            }
        }

        assert_eq!(
            signals,
            vec![
                TimerSignal::Tick { epoch: 7, remaining: 2 },
                TimerSignal::Tick { epoch: 7, remaining: 1 },
                TimerSignal::Tick { epoch: 7, remaining: 0 },
                TimerSignal::Expired { epoch: 7 },
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_silences_countdown_and_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut timer = CountdownTimer::new(30, tx);
        timer.start(1);
        timer.stop();
        timer.stop();
        assert!(!timer.is_active());

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_only_newest_countdown() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut timer = CountdownTimer::new(2, tx);
        timer.start(1);
        timer.start(2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut epochs = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            epochs.push(signal.epoch());
        }
        assert_eq!(epochs, vec![2, 2, 2]);
        assert!(!timer.is_current(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_tick_and_reset() {
        let (tx, _rx) = mpsc::channel(64);
        let mut timer = CountdownTimer::new(30, tx);
        timer.start(3);
        assert!(timer.apply_tick(3, 12));
        assert_eq!(timer.remaining(), 12);
        assert!(!timer.apply_tick(2, 5));
        assert_eq!(timer.remaining(), 12);

        timer.reset();
        assert_eq!(timer.remaining(), 30);
        assert!(!timer.is_active());
        assert!(!timer.apply_tick(3, 1));
    }
}
