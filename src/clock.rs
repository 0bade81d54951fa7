//! Process-wide cached wall time with one-second resolution.
//!
//! NFSv4 timestamps, lease accounting and cache expiry all run at second
//! granularity, so instead of calling into the OS on every request the
//! server reads a cached time that a background thread refreshes once per
//! second. [`must_increment`] guarantees strictly monotone modification
//! times when rapid mutations would otherwise produce equal stamps.

use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

struct Clock {
    now: Mutex<SystemTime>,
}

impl Clock {
    fn start() -> Self {
        let clock = Clock { now: Mutex::new(SystemTime::now()) };
        std::thread::Builder::new()
            .name("clock-tick".into())
            .spawn(|| loop {
                std::thread::sleep(Duration::from_secs(1));
                *instance().now.lock().expect("clock poisoned") = SystemTime::now();
            })
            .expect("failed to spawn clock thread");
        clock
    }

    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock poisoned")
    }
}

fn instance() -> &'static Clock {
    static GLOBAL: OnceLock<Clock> = OnceLock::new();
    GLOBAL.get_or_init(Clock::start)
}

/// The cached current time.
pub fn now() -> SystemTime {
    instance().now()
}

/// Time elapsed since `t`, zero if `t` is in the future.
pub fn since(t: SystemTime) -> Duration {
    now().duration_since(t).unwrap_or_default()
}

/// The current time, pushed forward to one second past `prev` when the
/// clock has not advanced beyond it yet.
pub fn must_increment(prev: SystemTime) -> SystemTime {
    now().max(prev + Duration::from_secs(1))
}

/// Seconds since the Unix epoch for `t`; zero for pre-epoch times.
pub fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Nanosecond remainder of `t` within its second.
pub fn unix_nanos(t: SystemTime) -> u32 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0)
}
