//! Fixed-cadence scheduler with startup jitter
//!
//! Wake-ups sit on a grid of `interval`, shifted by a jitter picked once at
//! startup. The next wake time is always taken from the grid, so the time a
//! cycle takes never accumulates as drift, and independently started
//! processes do not tick in lockstep.

use crate::clock::Clock;
use crate::error::AutoscalerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Work run once per scheduler tick
#[async_trait]
pub trait Tick: Send {
    async fn tick(&mut self);
}

pub struct Scheduler {
    interval: Duration,
    jitter: Duration,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Scheduler with a jitter drawn uniformly from `[0, interval)`
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Result<Self, AutoscalerError> {
        let interval_ms = checked_interval_ms(interval)?;
        let jitter = Duration::from_millis(OsRng.next_u64() % interval_ms);
        Ok(Self {
            interval,
            jitter,
            clock,
        })
    }

    pub fn with_jitter(
        interval: Duration,
        jitter: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AutoscalerError> {
        let interval_ms = checked_interval_ms(interval)?;
        let jitter = Duration::from_millis(jitter.as_millis() as u64 % interval_ms);
        Ok(Self {
            interval,
            jitter,
            clock,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// First grid point strictly after `now`
    pub fn next_wake(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = self.interval.as_millis() as i64;
        let jitter = self.jitter.as_millis() as i64;

        let sub_ms =
            chrono::Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000_000));
        let now = now - sub_ms;
        let offset = (now.timestamp_millis() - jitter).rem_euclid(interval);

        now + chrono::Duration::milliseconds(interval - offset)
    }

    /// Sleep until the next grid point and run `task` once; returns the wake time
    pub async fn tick<T: Tick>(&self, task: &mut T) -> DateTime<Utc> {
        let wake = self.next_wake(self.clock.now());
        debug!(wake = %wake, "Sleeping until next cycle");
        self.clock.sleep_until(wake).await;
        task.tick().await;
        wake
    }

    /// Run `n` ticks and return their wake times
    pub async fn run_ticks<T: Tick>(&self, task: &mut T, n: usize) -> Vec<DateTime<Utc>> {
        let mut wakes = Vec::with_capacity(n);
        for _ in 0..n {
            wakes.push(self.tick(task).await);
        }
        wakes
    }

    /// Run `task` forever
    pub async fn run<T: Tick>(&self, task: &mut T) {
        loop {
            self.tick(task).await;
        }
    }
}

fn checked_interval_ms(interval: Duration) -> Result<u64, AutoscalerError> {
    let ms = interval.as_millis() as u64;
    if ms == 0 {
        return Err(AutoscalerError::configuration(
            "schedule interval must be positive",
        ));
    }
    Ok(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    struct SlowTask {
        clock: Arc<ManualClock>,
        duration: Duration,
        runs: usize,
    }

    #[async_trait]
    impl Tick for SlowTask {
        async fn tick(&mut self) {
            self.runs += 1;
            self.clock.advance(self.duration);
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn scheduler(interval: u64, jitter: u64, clock: Arc<ManualClock>) -> Scheduler {
        Scheduler::with_jitter(
            Duration::from_secs(interval),
            Duration::from_secs(jitter),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_next_wake_is_on_shifted_grid() {
        let clock = Arc::new(ManualClock::new(at(1_000)));
        let scheduler = scheduler(60, 7, clock);

        // Grid points are 7, 67, 127, ... seconds past each minute boundary
        assert_eq!(scheduler.next_wake(at(1_000)), at(1_027));
        assert_eq!(scheduler.next_wake(at(1_026)), at(1_027));
        assert_eq!(scheduler.next_wake(at(1_027)), at(1_087));
    }

    #[test]
    fn test_next_wake_ignores_sub_millisecond_part() {
        let clock = Arc::new(ManualClock::new(at(1_000)));
        let scheduler = scheduler(60, 7, clock);

        let now = at(1_000) + chrono::Duration::nanoseconds(1_500_250);
        assert_eq!(scheduler.next_wake(now), at(1_027));
    }

    #[test]
    fn test_jitter_is_within_interval() {
        let clock = Arc::new(ManualClock::new(at(0)));
        for _ in 0..50 {
            let scheduler = Scheduler::new(Duration::from_secs(30), clock.clone()).unwrap();
            assert!(scheduler.jitter() < Duration::from_secs(30));
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let clock = Arc::new(ManualClock::new(at(0)));
        assert!(Scheduler::new(Duration::ZERO, clock).is_err());
    }

    #[tokio::test]
    async fn test_cycle_duration_does_not_drift() {
        let clock = Arc::new(ManualClock::new(at(1_000)));
        let scheduler = scheduler(60, 7, clock.clone());
        let mut task = SlowTask {
            clock: clock.clone(),
            duration: Duration::from_secs(45),
            runs: 0,
        };

        let wakes = scheduler.run_ticks(&mut task, 4).await;

        assert_eq!(task.runs, 4);
        assert_eq!(wakes, vec![at(1_027), at(1_087), at(1_147), at(1_207)]);
        for pair in wakes.windows(2) {
            assert_eq!(pair[1] - pair[0], chrono::Duration::seconds(60));
        }
    }

    #[tokio::test]
    async fn test_instant_cycles_still_advance_one_interval() {
        let clock = Arc::new(ManualClock::new(at(1_000)));
        let scheduler = scheduler(30, 0, clock.clone());
        let mut task = SlowTask {
            clock: clock.clone(),
            duration: Duration::ZERO,
            runs: 0,
        };

        let wakes = scheduler.run_ticks(&mut task, 3).await;
        assert_eq!(wakes, vec![at(1_020), at(1_050), at(1_080)]);
    }

    #[tokio::test]
    async fn test_overrunning_cycle_skips_to_next_grid_point() {
        let clock = Arc::new(ManualClock::new(at(1_000)));
        let scheduler = scheduler(60, 7, clock.clone());
        let mut task = SlowTask {
            clock: clock.clone(),
            duration: Duration::from_secs(90),
            runs: 0,
        };

        let wakes = scheduler.run_ticks(&mut task, 2).await;
        assert_eq!(wakes, vec![at(1_027), at(1_147)]);
    }
}
