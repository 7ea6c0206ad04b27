/*!
    Synchronized motion start for the whole axis group.

    Axes reach operation-enabled at different times (drive bring-up, fault recovery, vendor
    damping). Starting target advancement on each axis individually would tear a multi-axis
    contour apart, so the group holds every target at its actual position until all axes have
    been observed enabled, then waits a fixed settling delay, and only then releases motion
    for everyone in the same cycle.
*/

use std::{
    sync::Arc,
    time::Instant,
    };
use tracing::info;


/// monotonic time source, injected so the barrier can be driven by tests and simulations
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// wall clock based on [Instant], counting from its creation
pub struct SystemClock {
    epoch: Instant,
}
impl SystemClock {
    pub fn new() -> Self {
        Self {epoch: Instant::now()}
    }
}
impl Default for SystemClock {
    fn default() -> Self {Self::new()}
}
impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// manually advanced clock for tests and simulated runs
#[derive(Clone, Default)]
pub struct SimClock {
    now: Arc<std::sync::atomic::AtomicU64>,
}
impl SimClock {
    pub fn new() -> Self {Self::default()}
    /// advance the clock by the given amount of nanoseconds
    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, std::sync::atomic::Ordering::Relaxed);
    }
}
impl Clock for SimClock {
    fn now_ns(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::Relaxed)
    }
}


/**
    the all-enabled + delay motion-start barrier

    States walk `disarmed -> armed -> motion started`, strictly forward: once motion has
    started the barrier never re-arms for the session. A stop command does not disarm it
    either, it only zeroes the per-cycle delta.
*/
#[derive(Debug)]
pub struct StartBarrier {
    armed: bool,
    start_ns: u64,
    delay_ns: u64,
    motion_started: bool,
}
impl StartBarrier {
    /// disarmed, not-started barrier with the given settling delay
    pub fn new(delay_ns: u64) -> Self {
        Self {armed: false, start_ns: 0, delay_ns, motion_started: false}
    }

    pub fn motion_started(&self) -> bool {self.motion_started}
    pub fn armed(&self) -> bool {self.armed}

    /**
        advance the barrier by one cycle

        `run` is the current run command, `all_enabled` whether every axis currently reports
        operation-enabled. Returns true on the single cycle the barrier fires, so the caller
        can re-seed every axis target before releasing motion.
    */
    pub fn step(&mut self, run: bool, all_enabled: bool, now_ns: u64) -> bool {
        if self.motion_started || !run {
            return false;
        }
        if !self.armed && all_enabled {
            self.armed = true;
            self.start_ns = now_ns;
            info!(delay_ns = self.delay_ns, "all axes enabled, arming start barrier");
        }
        if self.armed && now_ns.wrapping_sub(self.start_ns) >= self.delay_ns {
            self.armed = false;
            self.motion_started = true;
            info!("start barrier elapsed, synchronized motion start");
            return true;
        }
        false
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_delay() {
        let mut barrier = StartBarrier::new(1_000);
        assert!(! barrier.step(true, false, 0));
        assert!(! barrier.armed());
        // all enabled: arms but does not fire before the delay
        assert!(! barrier.step(true, true, 100));
        assert!(barrier.armed());
        assert!(! barrier.step(true, true, 1_000));
        // first cycle at or past start + delay fires
        assert!(barrier.step(true, true, 1_100));
        assert!(barrier.motion_started());
        // never re-fires nor re-arms
        assert!(! barrier.step(true, true, 10_000));
        assert!(! barrier.armed());
    }

    #[test]
    fn does_not_arm_without_run() {
        let mut barrier = StartBarrier::new(1_000);
        assert!(! barrier.step(false, true, 0));
        assert!(! barrier.armed());
    }

    #[test]
    fn an_axis_dropping_out_does_not_disarm() {
        // arming is edge triggered; the delay keeps counting even if an axis
        // momentarily leaves operation-enabled
        let mut barrier = StartBarrier::new(1_000);
        barrier.step(true, true, 0);
        assert!(barrier.armed());
        assert!(! barrier.step(true, false, 500));
        assert!(barrier.step(true, false, 1_000));
    }
}
