//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Process-wide profiling clock. Each category has an interval and a
//! wait/notify channel that pollers block on between ticks.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use acct_gather_common::config::ProfileConfig;
use acct_gather_common::time::duration_to_secs_u32;
use parking_lot::{Condvar, Mutex};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info, trace};

/// Profiling categories sharing the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ProfileCategory {
    Energy,
    Task,
    Filesystem,
    Network,
}

impl ProfileCategory {
    fn index(self) -> usize {
        match self {
            Self::Energy => 0,
            Self::Task => 1,
            Self::Filesystem => 2,
            Self::Network => 3,
        }
    }
}

#[derive(Debug, Default)]
struct Channel {
    interval_secs: AtomicU32,
    generation: Mutex<u64>,
    notify: Condvar,
}

/// Shared profiling timer.
#[derive(Debug)]
pub struct ProfileTimer {
    running: AtomicBool,
    channels: [Channel; 4],
}

impl Default for ProfileTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileTimer {
    /// A running timer with every category interval unset (zero).
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            channels: Default::default(),
        }
    }

    /// Timer configured from the `[profile]` section. A disabled profile yields a
    /// stopped timer, which keeps samplers from looping.
    pub fn from_config(config: &ProfileConfig) -> Self {
        let timer = Self::new();
        timer.set_interval(
            ProfileCategory::Energy,
            duration_to_secs_u32(config.energy_interval),
        );
        timer.set_interval(
            ProfileCategory::Task,
            duration_to_secs_u32(config.task_interval),
        );
        if let Some(interval) = config.filesystem_interval {
            timer.set_interval(ProfileCategory::Filesystem, duration_to_secs_u32(interval));
        }
        if let Some(interval) = config.network_interval {
            timer.set_interval(ProfileCategory::Network, duration_to_secs_u32(interval));
        }
        if !config.enabled {
            timer.running.store(false, Ordering::SeqCst);
        }
        timer
    }

    fn channel(&self, category: ProfileCategory) -> &Channel {
        &self.channels[category.index()]
    }

    pub fn set_interval(&self, category: ProfileCategory, secs: u32) {
        self.channel(category)
            .interval_secs
            .store(secs, Ordering::SeqCst);
    }

    /// Interval for `category` in seconds; zero when unset.
    pub fn interval(&self, category: ProfileCategory) -> u32 {
        self.channel(category).interval_secs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wake everyone blocked on `category`.
    pub fn notify(&self, category: ProfileCategory) {
        let channel = self.channel(category);
        let mut generation = channel.generation.lock();
        *generation = generation.wrapping_add(1);
        channel.notify.notify_all();
        trace!(%category, generation = *generation, "profile tick");
    }

    /// Block until the next tick of `category` or until the timer stops.
    pub fn wait_tick(&self, category: ProfileCategory) {
        let channel = self.channel(category);
        let mut generation = channel.generation.lock();
        let seen = *generation;
        while *generation == seen && self.is_running() {
            channel.notify.wait(&mut generation);
        }
    }

    /// Like [`wait_tick`](Self::wait_tick) but gives up after `timeout`.
    /// Returns true when a tick (or stop) was observed.
    pub fn wait_tick_timeout(&self, category: ProfileCategory, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let channel = self.channel(category);
        let mut generation = channel.generation.lock();
        let seen = *generation;
        while *generation == seen && self.is_running() {
            if channel
                .notify
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                return *generation != seen || !self.is_running();
            }
        }
        true
    }

    /// Stop the timer and wake every waiter so pollers can observe it.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("profile timer stopped");
        }
        for category in ProfileCategory::iter() {
            let channel = self.channel(category);
            let _guard = channel.generation.lock();
            channel.notify.notify_all();
        }
    }

    /// Spawn the ticker thread that fires each category whose interval elapsed.
    /// The thread exits once the timer is stopped.
    pub fn spawn_ticker(self: &Arc<Self>, resolution: Duration) -> io::Result<JoinHandle<()>> {
        let timer = Arc::clone(self);
        thread::Builder::new()
            .name("acct-profile-timer".into())
            .spawn(move || {
                debug!(resolution_ms = resolution.as_millis() as u64, "profile ticker started");
                let started = Instant::now();
                let mut last_fired = [started; 4];
                while timer.is_running() {
                    thread::sleep(resolution);
                    let now = Instant::now();
                    for category in ProfileCategory::iter() {
                        let secs = timer.interval(category);
                        if secs == 0 {
                            continue;
                        }
                        let slot = &mut last_fired[category.index()];
                        if now.duration_since(*slot) >= Duration::from_secs(u64::from(secs)) {
                            *slot = now;
                            timer.notify(category);
                        }
                    }
                }
                debug!("profile ticker exited");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_wakes_waiter() {
        let timer = Arc::new(ProfileTimer::new());
        let waiter = {
            let timer = Arc::clone(&timer);
            thread::spawn(move || {
                timer.wait_tick_timeout(ProfileCategory::Energy, Duration::from_secs(5))
            })
        };
        // Keep ticking until the waiter has registered and been woken.
        while !waiter.is_finished() {
            timer.notify(ProfileCategory::Energy);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_times_out_without_tick() {
        let timer = ProfileTimer::new();
        timer.notify(ProfileCategory::Task);
        assert!(!timer.wait_tick_timeout(ProfileCategory::Energy, Duration::from_millis(20)));
    }

    #[test]
    fn stop_releases_blocked_waiters() {
        let timer = Arc::new(ProfileTimer::new());
        let waiter = {
            let timer = Arc::clone(&timer);
            thread::spawn(move || timer.wait_tick(ProfileCategory::Energy))
        };
        thread::sleep(Duration::from_millis(20));
        timer.stop();
        waiter.join().unwrap();
        assert!(!timer.is_running());
        // Once stopped, waits return immediately.
        timer.wait_tick(ProfileCategory::Network);
    }

    #[test]
    fn config_sets_intervals_and_running_state() {
        let config = ProfileConfig {
            energy_interval: Duration::from_secs(7),
            network_interval: Some(Duration::from_secs(60)),
            ..ProfileConfig::default()
        };
        let timer = ProfileTimer::from_config(&config);
        assert!(timer.is_running());
        assert_eq!(timer.interval(ProfileCategory::Energy), 7);
        assert_eq!(timer.interval(ProfileCategory::Network), 60);
        assert_eq!(timer.interval(ProfileCategory::Filesystem), 0);

        let disabled = ProfileTimer::from_config(&ProfileConfig {
            enabled: false,
            ..ProfileConfig::default()
        });
        assert!(!disabled.is_running());
    }

    #[test]
    fn ticker_fires_and_exits_on_stop() {
        let timer = Arc::new(ProfileTimer::new());
        timer.set_interval(ProfileCategory::Energy, 1);
        let ticker = timer.spawn_ticker(Duration::from_millis(50)).unwrap();
        assert!(timer.wait_tick_timeout(ProfileCategory::Energy, Duration::from_secs(5)));
        timer.stop();
        ticker.join().unwrap();
    }
}
