//! ---
//! acct_section: "02-energy-accounting"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Energy backend dispatch, sample codec, and sampler."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
//! Background thread that keeps the backend's node sample fresh by forwarding
//! every energy profile tick to it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::EnergyContext;
use crate::error::{EnergyError, Result};
use crate::ops::{EnergyData, EnergyDataKind};
use crate::timer::{ProfileCategory, ProfileTimer};

/// Lifecycle of the sampler thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    Running,
}

#[derive(Debug)]
struct Run {
    token: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Handle owning at most one sampler thread.
#[derive(Debug)]
pub struct EnergySampler {
    context: Arc<EnergyContext>,
    timer: Arc<ProfileTimer>,
    run: Mutex<Option<Run>>,
    frequency: AtomicU32,
}

impl EnergySampler {
    pub fn new(context: Arc<EnergyContext>, timer: Arc<ProfileTimer>) -> Self {
        Self {
            context,
            timer,
            run: Mutex::new(None),
            frequency: AtomicU32::new(0),
        }
    }

    /// Start dynamic sampling. A zero `frequency` leaves sampling disabled.
    ///
    /// Init failures are returned. Starting twice, or failing to spawn the
    /// thread, is logged and otherwise ignored.
    pub fn start(&self, frequency: u32) -> Result<()> {
        self.context.init()?;

        let mut run = self.run.lock();
        if run
            .as_ref()
            .is_some_and(|current| current.token.load(Ordering::Acquire))
        {
            warn!(error = %EnergyError::AlreadyRunning, "ignoring sampler start");
            return Ok(());
        }

        self.frequency.store(frequency, Ordering::Relaxed);
        if frequency == 0 {
            debug!("energy sampling frequency is 0; dynamic sampling disabled");
            return Ok(());
        }

        let token = Arc::new(AtomicBool::new(true));
        let spawned = thread::Builder::new().name("acct-energy-poll".into()).spawn({
            let context = Arc::clone(&self.context);
            let timer = Arc::clone(&self.timer);
            let token = Arc::clone(&token);
            move || poll_loop(&context, &timer, &token)
        });

        match spawned {
            Ok(handle) => {
                let previous = run.replace(Run {
                    token,
                    handle: Some(handle),
                });
                drop(run);
                info!(frequency, backend = self.context.backend_name(), "energy sampler started");
                // A stopped run may still be parked on the timer until its next wake.
                if let Some(previous) = previous.and_then(|previous| previous.handle) {
                    if previous.is_finished() {
                        join_thread(previous);
                    } else {
                        debug!("previous energy sampler detached until its next wake");
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "unable to spawn energy sampler; dynamic sampling disabled");
            }
        }
        Ok(())
    }

    /// Ask the thread to exit. Takes effect at its next wake-up.
    pub fn stop(&self) {
        if let Some(current) = self.run.lock().as_ref() {
            if current.token.swap(false, Ordering::AcqRel) {
                debug!("energy sampler stop requested");
            }
        }
    }

    /// Wait for the sampler thread to exit. Returns immediately if none runs.
    pub fn join(&self) {
        let handle = self.run.lock().as_mut().and_then(|current| current.handle.take());
        if let Some(handle) = handle {
            join_thread(handle);
        }
    }

    pub fn state(&self) -> SamplerState {
        match self.run.lock().as_ref() {
            Some(current) if current.token.load(Ordering::Acquire) => SamplerState::Running,
            _ => SamplerState::Stopped,
        }
    }

    /// Frequency passed to the last effective [`start`](Self::start).
    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }
}

impl Drop for EnergySampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_thread(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("energy sampler thread panicked");
    }
}

fn poll_loop(context: &EnergyContext, timer: &ProfileTimer, token: &AtomicBool) {
    debug!("energy sampler loop entered");
    if let Some(metrics) = context.metrics() {
        metrics.sampler_entered();
    }
    while token.load(Ordering::Acquire) && context.is_initialized() && timer.is_running() {
        let delta = i64::from(timer.interval(ProfileCategory::Energy)) - 1;
        let started = Instant::now();
        let tick = context.bound_set_data(EnergyDataKind::Profile, EnergyData::Interval(delta));
        if let Err(err) = tick {
            warn!(error = %err, delta, "energy profile tick failed");
        }
        if let Some(metrics) = context.metrics() {
            metrics.observe_tick(started.elapsed());
        }
        timer.wait_tick(ProfileCategory::Energy);
    }
    token.store(false, Ordering::Release);
    if let Some(metrics) = context.metrics() {
        metrics.sampler_exited();
    }
    debug!("energy sampler loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::backends::SyntheticBackend;
    use crate::ops::EnergyOps;
    use crate::registry::BackendRegistry;

    fn shared_meter() -> (Arc<SyntheticBackend>, Arc<EnergyContext>) {
        let meter = Arc::new(SyntheticBackend::new());
        let mut registry = BackendRegistry::new();
        let bound = Arc::clone(&meter);
        registry
            .register_fn("synthetic", move || Ok(Arc::clone(&bound) as Arc<dyn EnergyOps>))
            .unwrap();
        let context = Arc::new(EnergyContext::new("synthetic", Arc::new(registry)));
        (meter, context)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn zero_frequency_stays_stopped() {
        let (_, context) = shared_meter();
        let sampler = EnergySampler::new(context, Arc::new(ProfileTimer::new()));
        sampler.start(0).unwrap();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert_eq!(sampler.frequency(), 0);
    }

    #[test]
    fn sampler_forwards_ticks_and_exits_on_timer_stop() {
        let (meter, context) = shared_meter();
        let timer = Arc::new(ProfileTimer::new());
        timer.set_interval(ProfileCategory::Energy, 30);
        let sampler = EnergySampler::new(context, Arc::clone(&timer));

        sampler.start(30).unwrap();
        assert_eq!(sampler.state(), SamplerState::Running);
        assert!(wait_for(|| meter.polls() >= 1));

        timer.stop();
        sampler.join();
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn second_start_does_not_spawn() {
        let (meter, context) = shared_meter();
        let timer = Arc::new(ProfileTimer::new());
        let sampler = EnergySampler::new(context, Arc::clone(&timer));
        sampler.start(10).unwrap();
        sampler.start(10).unwrap();
        assert!(wait_for(|| meter.polls() >= 1));
        // With an unset interval every tick refreshes, so a second thread would poll again.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(meter.polls(), 1);

        timer.stop();
        sampler.join();
    }

    #[test]
    fn stop_is_honoured_at_next_wake() {
        let (meter, context) = shared_meter();
        let timer = Arc::new(ProfileTimer::new());
        let sampler = EnergySampler::new(context, Arc::clone(&timer));
        sampler.start(5).unwrap();
        assert!(wait_for(|| meter.polls() >= 1));
        // Let the thread park on the energy channel before waking it.
        thread::sleep(Duration::from_millis(50));

        sampler.stop();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        timer.notify(ProfileCategory::Energy);
        sampler.join();
        assert_eq!(meter.polls(), 1);
    }

    #[test]
    fn start_reports_init_failure() {
        let context = Arc::new(EnergyContext::new(
            "acct_gather_energy/ipmi",
            Arc::new(BackendRegistry::with_builtin()),
        ));
        let sampler = EnergySampler::new(context, Arc::new(ProfileTimer::new()));
        let err = sampler.start(30).unwrap_err();
        assert!(matches!(err, EnergyError::BackendUnavailable { .. }));
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn restart_after_stop_does_not_wait_for_parked_thread() {
        let (meter, context) = shared_meter();
        let timer = Arc::new(ProfileTimer::new());
        let sampler = Arc::new(EnergySampler::new(context, Arc::clone(&timer)));
        sampler.start(30).unwrap();
        assert!(wait_for(|| meter.polls() >= 1));
        thread::sleep(Duration::from_millis(50));
        sampler.stop();

        // No tick is ever delivered, so the first thread stays parked.
        let (done_tx, done_rx) = mpsc::channel();
        let restarted = Arc::clone(&sampler);
        thread::spawn(move || {
            let _ = done_tx.send(restarted.start(30));
        });
        let outcome = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("restart returned");
        assert!(outcome.is_ok());
        assert_eq!(sampler.state(), SamplerState::Running);
        assert!(wait_for(|| meter.polls() >= 2));

        timer.stop();
        sampler.join();
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn finalized_context_is_not_rebound_by_sampler() {
        let (meter, context) = shared_meter();
        let timer = Arc::new(ProfileTimer::new());
        let sampler = EnergySampler::new(Arc::clone(&context), Arc::clone(&timer));
        sampler.start(30).unwrap();
        assert!(wait_for(|| meter.polls() >= 1));

        context.fini().unwrap();
        assert!(wait_for(|| {
            timer.notify(ProfileCategory::Energy);
            sampler.state() == SamplerState::Stopped
        }));
        sampler.join();
        assert!(!context.is_initialized());
        assert_eq!(context.resolutions(), 1);
    }
}
