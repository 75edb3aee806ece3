//! Test orchestrator
//!
//! Drives each candidate app through
//! `candidate -> device_reset -> capturing -> launched -> monitoring -> done`,
//! one app at a time. A failing app is rolled back, written to the skip-list
//! and the pipeline moves on; only pipeline-fatal errors stop the run.

use crate::capture::CaptureProxy;
use crate::config::RunnerConfig;
use crate::device::{DeviceControl, PreLaunchHook};
use crate::preflight::{check_tracker_resolution, HostResolver, SystemResolver};
use async_trait::async_trait;
use privprobe_common::{
    timing::{delay, with_timeout},
    AppCandidate, AppOutcome, AppState, Error, FailureRecord, FailureRepository, Result,
    RunLedger, RunSummary, SkipReason,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Current state of one app, rejecting transitions the state machine forbids.
#[derive(Debug)]
pub struct StateTracker {
    app_id: String,
    version: Option<String>,
    state: AppState,
}

impl StateTracker {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            version: None,
            state: AppState::Candidate,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn advance(&mut self, next: AppState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("{}: {} -> {}", self.app_id, self.state, next);
        self.state = next;
        Ok(())
    }

    fn outcome(&self, skip_reason: Option<SkipReason>, error: Option<String>) -> AppOutcome {
        AppOutcome {
            app_id: self.app_id.clone(),
            version: self.version.clone(),
            state: self.state,
            skip_reason,
            error,
        }
    }
}

/// Starts a capture session right before the app's first launch.
struct CaptureHook<'a> {
    capture: &'a mut CaptureProxy,
    ledger: &'a dyn RunLedger,
    app_record: i64,
    tracker: &'a mut StateTracker,
}

#[async_trait]
impl<'a> PreLaunchHook for CaptureHook<'a> {
    async fn before_launch(&mut self, app_id: &str) -> Result<()> {
        self.tracker.advance(AppState::Capturing)?;
        let run = self.ledger.insert_run(self.app_record)?;
        debug!("Recorded run {} for {}", run, app_id);
        self.capture.start(run).await
    }
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Interrupted),
        result = fut => result,
    }
}

/// Sequential test pipeline over a set of candidates
pub struct Orchestrator {
    config: RunnerConfig,
    device: Box<dyn DeviceControl>,
    ledger: Arc<dyn RunLedger>,
    failures: Box<dyn FailureRepository>,
    capture: CaptureProxy,
    resolver: Box<dyn HostResolver>,
    cancel: CancellationToken,
    /// App Record of the app under test, rolled back if it fails
    in_flight: Option<i64>,
    outcomes: Vec<AppOutcome>,
}

impl Orchestrator {
    pub fn new(
        config: RunnerConfig,
        device: Box<dyn DeviceControl>,
        ledger: Arc<dyn RunLedger>,
        failures: Box<dyn FailureRepository>,
        capture: CaptureProxy,
    ) -> Self {
        Self {
            config,
            device,
            ledger,
            failures,
            capture,
            resolver: Box::new(SystemResolver),
            cancel: CancellationToken::new(),
            in_flight: None,
            outcomes: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Abort the pipeline when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Outcomes of every candidate processed so far.
    pub fn outcomes(&self) -> &[AppOutcome] {
        &self.outcomes
    }

    /// Test every candidate in the given order.
    ///
    /// Per-app failures are recorded and don't fail the run. An error here is
    /// pipeline-fatal; the capture proxy is stopped and the in-flight App
    /// Record rolled back before it is returned.
    pub async fn run(&mut self, candidates: Vec<AppCandidate>) -> Result<RunSummary> {
        let result = self.run_candidates(candidates).await;

        if let Err(e) = &result {
            match e {
                Error::Interrupted => warn!("Interrupted, cleaning up"),
                e => error!("Pipeline failed: {}", e),
            }
            self.teardown_failed().await;
        }
        self.device.release().await;

        result
    }

    async fn run_candidates(&mut self, candidates: Vec<AppCandidate>) -> Result<RunSummary> {
        let cancel = self.cancel.clone();
        let mut summary = RunSummary::default();

        cancellable(&cancel, self.preflight()).await?;
        let skip_list = self.failures.list_failures()?;
        debug!("{} app(s) on the skip-list", skip_list.len());

        info!("Preparing device");
        cancellable(&cancel, self.device.ensure_device()).await?;

        info!("Testing {} candidate(s)", candidates.len());
        for candidate in &candidates {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            cancellable(&cancel, self.preflight()).await?;

            let outcome = self.process(candidate, &skip_list).await?;
            summary.record(&outcome);
            self.outcomes.push(outcome);
        }

        info!(
            "Done: {} app(s), {} done, {} failed, {} skipped",
            summary.total, summary.done, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn preflight(&self) -> Result<()> {
        check_tracker_resolution(self.resolver.as_ref(), &self.config.fixtures.tracker_domains).await
    }

    /// Run one candidate to a terminal state. Only pipeline-fatal errors and
    /// failures to persist the skip-list escape.
    async fn process(
        &mut self,
        candidate: &AppCandidate,
        skip_list: &HashSet<String>,
    ) -> Result<AppOutcome> {
        let mut tracker = StateTracker::new(&candidate.app_id);

        if skip_list.contains(&candidate.app_id) {
            tracker.advance(AppState::Skipped)?;
            info!(
                "Skipping {} because {}",
                candidate.app_id,
                SkipReason::PreviouslyFailed
            );
            return Ok(tracker.outcome(Some(SkipReason::PreviouslyFailed), None));
        }

        let cancel = self.cancel.clone();
        let result = cancellable(&cancel, self.test_app(candidate, &mut tracker)).await;

        match result {
            Ok(skip) => {
                self.in_flight = None;
                Ok(tracker.outcome(skip, None))
            }
            Err(e) if e.is_pipeline_fatal() => {
                self.teardown_failed().await;
                Err(e)
            }
            Err(e) => {
                error!("Analyzing {} failed: {}", candidate.app_id, e);
                if let Err(transition) = tracker.advance(AppState::Failed) {
                    warn!("{}", transition);
                }

                self.teardown_failed().await;
                self.failures
                    .record_failure(&FailureRecord::new(&candidate.app_id, &e))?;

                Ok(tracker.outcome(None, Some(e.to_string())))
            }
        }
    }

    /// Returns the skip reason when the app turns out to be done already.
    async fn test_app(
        &mut self,
        candidate: &AppCandidate,
        tracker: &mut StateTracker,
    ) -> Result<Option<SkipReason>> {
        let app_id = candidate.app_id.as_str();

        let version = self
            .device
            .get_app_version(&candidate.path)
            .await?
            .ok_or_else(|| {
                Error::Device(format!(
                    "could not determine version of {}",
                    candidate.path.display()
                ))
            })?;
        tracker.version = Some(version.clone());

        if self.ledger.app_already_done(app_id, &version)? {
            tracker.advance(AppState::Skipped)?;
            info!("Skipping {}@{} because {}", app_id, version, SkipReason::AlreadyDone);
            return Ok(Some(SkipReason::AlreadyDone));
        }

        info!("Analyzing {}@{}", app_id, version);
        tracker.advance(AppState::DeviceReset)?;
        let app_record = self.ledger.insert_app(app_id, &version)?;
        self.in_flight = Some(app_record);

        self.reset_device().await?;

        let geo = self.config.fixtures.geolocation;
        self.device
            .set_geolocation(geo.longitude, geo.latitude, geo.altitude)
            .await?;

        let mut hook = CaptureHook {
            capture: &mut self.capture,
            ledger: self.ledger.as_ref(),
            app_record,
            tracker: &mut *tracker,
        };
        self.device
            .reset_app(app_id, &candidate.path, Some(&mut hook))
            .await?;
        tracker.advance(AppState::Launched)?;

        tracker.advance(AppState::Monitoring)?;
        self.monitor(app_id).await?;

        self.capture.stop().await;
        tracker.advance(AppState::Done)?;
        info!("Finished {}@{}", app_id, version);
        Ok(None)
    }

    /// Reset the device; if that fails, restart it once and reset again.
    async fn reset_device(&mut self) -> Result<()> {
        let limit = self.config.timing.reset_timeout();

        match with_timeout("resetting device", limit, self.device.reset_device()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The emulator sometimes stops accepting commands altogether.
                warn!("Device reset failed ({}), restarting device", e);
                with_timeout("restarting device", limit, self.device.ensure_device()).await?;
                with_timeout("resetting device", limit, self.device.reset_device()).await
            }
        }
    }

    /// Observe the app for the configured window, checking after a third of it
    /// and again at the end that it is still in the foreground.
    async fn monitor(&mut self, app_id: &str) -> Result<()> {
        let window = self.config.timing.app_timeout();
        let first = window / 3;
        info!("Observing {} for {:?}", app_id, window);

        delay(first).await;
        self.assert_foreground(app_id).await?;
        delay(window.saturating_sub(first)).await;
        self.assert_foreground(app_id).await
    }

    async fn assert_foreground(&mut self, app_id: &str) -> Result<()> {
        let actual = with_timeout(
            "checking foreground app",
            self.config.timing.query_timeout(),
            self.device.get_foreground_app_id(),
        )
        .await?;

        if actual.as_deref() != Some(app_id) {
            return Err(Error::AppNotForeground {
                expected: app_id.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Stop the capture proxy and roll back the in-flight App Record.
    async fn teardown_failed(&mut self) {
        self.capture.stop().await;

        if let Some(id) = self.in_flight.take() {
            info!("Rolling back app record {}", id);
            if let Err(e) = self.ledger.delete_app(id) {
                error!("Failed to roll back app record {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_happy_path() {
        let mut tracker = StateTracker::new("com.example.a");
        for next in [
            AppState::DeviceReset,
            AppState::Capturing,
            AppState::Launched,
            AppState::Monitoring,
            AppState::Done,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.state(), AppState::Done);
    }

    #[test]
    fn test_tracker_rejects_launch_without_capture() {
        let mut tracker = StateTracker::new("com.example.a");
        tracker.advance(AppState::DeviceReset).unwrap();

        let err = tracker.advance(AppState::Launched).unwrap_err();
        match err {
            Error::InvalidStateTransition { from, to } => {
                assert_eq!(from, "device_reset");
                assert_eq!(to, "launched");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(tracker.state(), AppState::DeviceReset);
    }

    #[test]
    fn test_tracker_failed_is_final() {
        let mut tracker = StateTracker::new("com.example.a");
        tracker.advance(AppState::DeviceReset).unwrap();
        tracker.advance(AppState::Failed).unwrap();
        assert!(tracker.advance(AppState::Failed).is_err());

        let outcome = tracker.outcome(None, Some("boom".to_string()));
        assert_eq!(outcome.state, AppState::Failed);
        assert_eq!(outcome.version, None);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Interrupted)));
    }
}
