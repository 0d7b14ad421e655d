//! Speech request dispatcher
//!
//! The single entry point for speaking. A request goes through:
//!
//! 1. markdown stripping and validation
//! 2. engine selection
//! 3. the dedupe gate (same text/speed/engine → one run at a time)
//! 4. the concurrency limiter
//! 5. the process runner, with an adaptive timeout in sync mode
//!
//! Fire-and-forget requests run on a background thread that owns its
//! permit and gate ticket, so both are released whatever happens there.

use super::engine::{EngineRegistry, SelectedEngine};
use super::gate::{Admission, Fingerprint, GateTicket, RequestGate};
use super::limiter::{ConcurrencyLimiter, Permit};
use super::request::SpeechRequest;
use super::runner::{ProcessRunner, RunOutcome};
use super::speed::SpeedModel;
use super::status::{fmt_g, Mode, SpeakOutcome, StatusDetails};
use super::timeout::TimeoutEstimator;
use crate::config::DispatchSettings;
use crate::markdown::strip_markdown;
use crate::SayError;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Inner {
    settings: DispatchSettings,
    engines: EngineRegistry,
    speed_model: SpeedModel,
    estimator: TimeoutEstimator,
    runner: ProcessRunner,
    gate: RequestGate,
    limiter: ConcurrencyLimiter,
    /// Fire-and-forget runs still (possibly) executing
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything a run needs once it has been admitted
struct Job {
    fingerprint: Fingerprint,
    engine: SelectedEngine,
    text: String,
    speed: f64,
    timeout: Option<f64>,
    hard_timeout: f64,
    warmup: bool,
    details: StatusDetails,
}

/// Process-wide speech dispatcher
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Dispatcher using the standard engines (say, swift, espeak)
    pub fn new(settings: DispatchSettings) -> Self {
        let engines = EngineRegistry::standard(&settings);
        Self::with_engines(settings, engines)
    }

    /// Dispatcher with a custom engine list
    pub fn with_engines(settings: DispatchSettings, engines: EngineRegistry) -> Self {
        info!(
            "Speech dispatcher ready (concurrency {}, hard timeout {}s)",
            settings.max_concurrent,
            fmt_g(settings.hard_timeout_seconds)
        );
        Self {
            inner: Arc::new(Inner {
                speed_model: SpeedModel::new(settings.default_cps, settings.smoothing),
                estimator: TimeoutEstimator::new(&settings),
                runner: ProcessRunner::new(settings.grace),
                gate: RequestGate::new(),
                limiter: ConcurrencyLimiter::new(settings.max_concurrent),
                background: Mutex::new(Vec::new()),
                engines,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.inner.settings
    }

    pub fn speed_model(&self) -> &SpeedModel {
        &self.inner.speed_model
    }

    pub fn gate(&self) -> &RequestGate {
        &self.inner.gate
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    /// Number of speech processes alive right now
    pub fn active_processes(&self) -> usize {
        self.inner.runner.active_count()
    }

    /// Speak a request
    ///
    /// Returns immediately in fire-and-forget mode; otherwise blocks until
    /// the utterance ends, times out or is stopped.
    pub fn speak(&self, request: &SpeechRequest) -> SpeakOutcome {
        let settings = &self.inner.settings;

        let text = strip_markdown(&request.text);
        if text.is_empty() {
            return SpeakOutcome::Rejected(SayError::Validation("Text is empty.".to_string()));
        }
        if let Err(e) = self.validate_speed(request.speed) {
            return SpeakOutcome::Rejected(e);
        }

        let hard_timeout = if request.hard_timeout_seconds.is_finite()
            && request.hard_timeout_seconds > 0.0
        {
            request.hard_timeout_seconds
        } else {
            warn!(
                "Ignoring invalid hard timeout {}, using {}",
                request.hard_timeout_seconds, settings.hard_timeout_seconds
            );
            settings.hard_timeout_seconds
        };

        let Some(engine) = self.inner.engines.select(request.engine, request.speed) else {
            return SpeakOutcome::Rejected(SayError::EngineUnavailable);
        };

        let mode = if request.wait_for_completion {
            Mode::Sync
        } else {
            Mode::Async
        };
        let details = StatusDetails {
            engine: engine.name.clone(),
            mode,
            speed: request.speed,
            hard_timeout,
            dedupe: request.dedupe_seconds,
            concurrency: self.inner.limiter.capacity(),
            timeout: request.timeout_seconds,
            timeout_used: None,
            dynamic_timeout: None,
        };

        let fingerprint = Fingerprint::new(&engine.name, request.speed, &text);
        let ticket = match self.inner.gate.admit(&fingerprint, request.dedupe_seconds) {
            Admission::Proceed(ticket) => ticket,
            Admission::AlreadyRunning => return SpeakOutcome::AlreadyRunning(details),
            Admission::RecentDuplicate => return SpeakOutcome::Deduped(details),
        };

        let job = Job {
            fingerprint,
            engine,
            text,
            speed: request.speed,
            timeout: request.timeout_seconds,
            hard_timeout,
            warmup: request.warmup,
            details,
        };

        match mode {
            Mode::Sync => {
                let _permit = self.inner.limiter.acquire();
                let outcome = self.inner.execute(&job, mode);
                drop(ticket);
                outcome
            }
            Mode::Async => self.spawn_background(job, ticket),
        }
    }

    /// Stop live speech: all of it, or only the newest process
    pub fn stop_speech(&self, stop_all: bool) -> String {
        match self.inner.runner.stop(stop_all) {
            0 => "No active speech.".to_string(),
            n => {
                info!("Stopped {} speech process(es)", n);
                format!("Stopped speech ({}).", n)
            }
        }
    }

    /// Block until every fire-and-forget run has finished
    pub fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut background = self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                background.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("Background speech thread panicked");
                }
            }
        }
    }

    fn validate_speed(&self, speed: f64) -> crate::Result<()> {
        let settings = &self.inner.settings;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(SayError::Validation(
                "Invalid speed (must be a positive number).".to_string(),
            ));
        }
        if speed < settings.min_speed || speed > settings.max_speed {
            return Err(SayError::Validation(format!(
                "Invalid speed (supported range: {}..{}).",
                fmt_g(settings.min_speed),
                fmt_g(settings.max_speed)
            )));
        }
        Ok(())
    }

    fn spawn_background(&self, job: Job, ticket: GateTicket) -> SpeakOutcome {
        let permit = match self
            .inner
            .limiter
            .try_acquire_for(self.inner.settings.busy_probe)
        {
            Some(permit) => permit,
            None => {
                // Never ran, so it must not count as a recent duplicate
                ticket.cancel();
                return SpeakOutcome::Busy(job.details);
            }
        };

        let mut details = job.details.clone();
        details.timeout_used = Some(job.hard_timeout);

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || run_detached(inner, job, permit, ticket));

        match spawned {
            Ok(handle) => {
                let mut background = self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                background.retain(|h| !h.is_finished());
                background.push(handle);
                SpeakOutcome::Started(details)
            }
            Err(e) => SpeakOutcome::Failed(SayError::Io(e)),
        }
    }
}

/// Body of a fire-and-forget run
///
/// `permit` and `ticket` are dropped when this returns or unwinds.
fn run_detached(inner: Arc<Inner>, job: Job, permit: Permit, ticket: GateTicket) {
    let _permit = permit;
    let _ticket = ticket;
    let outcome = inner.execute(&job, Mode::Async);
    if outcome.is_success() {
        debug!("Background speech finished: {}", outcome);
    } else {
        warn!("Background speech: {}", outcome);
    }
}

impl Inner {
    /// Run warmup (if asked) and the main utterance
    fn execute(&self, job: &Job, mode: Mode) -> SpeakOutcome {
        if job.warmup {
            let warmup_timeout = job.timeout.or(Some(self.settings.default_timeout_seconds));
            let report = self.runner.run(
                &job.fingerprint,
                &job.engine.command,
                &self.settings.warmup_text,
                warmup_timeout,
                job.hard_timeout,
            );
            if !report.outcome.is_success() {
                warn!("Warmup failed: {}", report.diagnostic.trim());
            }
        }

        let mut details = job.details.clone();
        let per_call = match mode {
            Mode::Sync => {
                let dynamic = self.estimator.estimate(
                    &self.speed_model,
                    &job.text,
                    job.timeout,
                    &job.engine.name,
                    job.speed,
                );
                details.dynamic_timeout = Some(dynamic);
                details.timeout_used = Some(dynamic.min(job.hard_timeout));
                Some(dynamic)
            }
            // Fire-and-forget relies on the hard ceiling only
            Mode::Async => {
                details.timeout_used = Some(job.hard_timeout);
                None
            }
        };

        let report = self.runner.run(
            &job.fingerprint,
            &job.engine.command,
            &job.text,
            per_call,
            job.hard_timeout,
        );

        if report.outcome.is_success() && report.elapsed > Duration::ZERO {
            let chars = job.text.chars().count() as f64;
            let measured = chars / report.elapsed.as_secs_f64();
            self.speed_model
                .update(&job.engine.name, measured / job.speed.max(1e-3));
        }

        match report.outcome {
            RunOutcome::Exited(0) => SpeakOutcome::Spoken(details),
            RunOutcome::Exited(code) => SpeakOutcome::Failed(SayError::EngineExit {
                code,
                stderr: report.diagnostic.trim().to_string(),
            }),
            RunOutcome::NotFound => SpeakOutcome::Failed(SayError::EngineMissing),
            RunOutcome::NotExecutable => SpeakOutcome::Failed(SayError::EngineNotExecutable),
            RunOutcome::TimedOut => {
                let used = details.timeout_used.unwrap_or(job.hard_timeout);
                SpeakOutcome::TimedOut(
                    SayError::Timeout {
                        seconds: fmt_g(used),
                    },
                    details,
                )
            }
            RunOutcome::Signaled(signal) => SpeakOutcome::Stopped(signal, details),
            RunOutcome::SpawnFailed(message) => SpeakOutcome::Failed(SayError::Other(format!(
                "Speech failed to start: {}",
                message
            ))),
        }
    }
}
