// Destination module
// The orchestrator-held handle for one scrobble destination: owns its
// lifecycle state, dedup memory and options, and drives the client contract

pub mod traits;

use crate::config::DestinationOptions;
use crate::dedup::{DedupEngine, SubmittedScrobble};
use crate::error::SubmissionError;
use crate::play::PlayEvent;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use traits::ScrobbleClient;

/// Destination lifecycle. `Initializing` exists so a slow in-flight
/// initialization is skipped rather than doubled up; a hard failure during
/// submission drops the destination back to `NotInitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    NotInitialized,
    Initializing,
    Initialized,
}

/// Lifecycle and auth state, owned by the handle rather than living as
/// ambient mutable state on the client.
#[derive(Debug, Clone, Copy)]
pub struct DestinationState {
    pub init: InitState,
    pub authed: bool,
}

impl DestinationState {
    fn new() -> Self {
        Self {
            init: InitState::NotInitialized,
            authed: false,
        }
    }
}

/// Await a network-bound operation under the destination's timeout. A
/// timeout is reported as `None` and treated like a returned failure.
async fn with_timeout<T>(limit: Option<Duration>, fut: impl Future<Output = T>) -> Option<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// One configured scrobble destination: the external client plus everything
/// the orchestrator owns for it. Only ever driven by the dispatcher, one
/// batch at a time.
pub struct Destination {
    client: Box<dyn ScrobbleClient>,
    options: DestinationOptions,
    state: DestinationState,
    engine: DedupEngine,
    scrobbled_count: u64,
}

impl Destination {
    pub fn new(client: Box<dyn ScrobbleClient>, options: DestinationOptions) -> Self {
        let engine = DedupEngine::new(options.clone());
        Self {
            client,
            options,
            state: DestinationState::new(),
            engine,
            scrobbled_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    pub fn kind(&self) -> &str {
        self.client.kind()
    }

    /// Log label, e.g. "maloja (home)"
    pub fn label(&self) -> String {
        format!("{} ({})", self.client.kind(), self.client.name())
    }

    pub fn state(&self) -> DestinationState {
        self.state
    }

    pub fn scrobbled_count(&self) -> u64 {
        self.scrobbled_count
    }

    pub fn submitted_scrobbles(&self) -> &[SubmittedScrobble] {
        self.engine.submitted_scrobbles()
    }

    /// Bring the destination to `Initialized`, calling the client when it is
    /// not there yet. A concurrent in-flight initialization is skipped
    /// rather than doubled up.
    pub async fn ensure_initialized(&mut self) -> bool {
        match self.state.init {
            InitState::Initialized => true,
            InitState::Initializing => {
                log::warn!("{}: still initializing, skipping", self.label());
                false
            }
            InitState::NotInitialized => {
                log::debug!("{}: attempting initialization...", self.label());
                self.state.init = InitState::Initializing;
                let result =
                    with_timeout(self.options.operation_timeout(), self.client.initialize()).await;
                match result {
                    Some(Ok(())) => {
                        self.state.init = InitState::Initialized;
                        log::info!("{}: initialized", self.label());
                        true
                    }
                    Some(Err(e)) => {
                        self.state.init = InitState::NotInitialized;
                        log::error!("{}: {}", self.label(), e);
                        false
                    }
                    None => {
                        self.state.init = InitState::NotInitialized;
                        log::error!("{}: initialization timed out", self.label());
                        false
                    }
                }
            }
        }
    }

    /// Ensure credentials are usable. Destinations whose auth needs a human
    /// cannot proceed unattended and are skipped with a warning.
    pub async fn ensure_authenticated(&mut self) -> bool {
        if !self.client.requires_auth() || self.state.authed {
            return true;
        }
        if self.client.requires_auth_interaction() {
            log::warn!(
                "{}: cannot scrobble because user interaction is required for authentication",
                self.label()
            );
            return false;
        }
        let result =
            with_timeout(self.options.operation_timeout(), self.client.authenticate()).await;
        match result {
            Some(Ok(())) => {
                self.state.authed = true;
                log::info!("{}: auth OK", self.label());
                true
            }
            Some(Err(e)) => {
                self.state.authed = false;
                log::warn!("{}: auth failed: {}", self.label(), e);
                false
            }
            None => {
                self.state.authed = false;
                log::warn!("{}: auth timed out", self.label());
                false
            }
        }
    }

    /// Initialized, authenticated where required, and passing the client's
    /// own health probe.
    pub async fn is_ready(&self) -> bool {
        let state_ready = self.state.init == InitState::Initialized
            && (!self.client.requires_auth() || self.state.authed);
        if !state_ready {
            return false;
        }
        with_timeout(self.options.operation_timeout(), self.client.check_health())
            .await
            .unwrap_or(false)
    }

    /// Whether the recent window is stale for this dispatch.
    pub fn needs_refresh(&self, force: bool, check_time: chrono::DateTime<Utc>) -> bool {
        self.engine.needs_refresh(force, check_time)
    }

    /// Replace the recent window from the destination. A failed fetch is
    /// logged and the stale window kept; the destination is not dropped.
    pub async fn refresh(&mut self) {
        if !self.options.refresh_enabled {
            log::debug!("{}: scrobble refresh disabled", self.label());
            self.engine.mark_checked(Utc::now());
            return;
        }
        log::debug!("{}: refreshing recent scrobbles", self.label());
        let result = with_timeout(
            self.options.operation_timeout(),
            self.client.recent_scrobbles(),
        )
        .await;
        match result {
            Some(Ok(scrobbles)) => self.engine.replace_recent(scrobbles, Utc::now()),
            Some(Err(e)) => {
                log::error!(
                    "{}: error while refreshing scrobbles, proceeding with stale data: {}",
                    self.label(),
                    e
                );
            }
            None => {
                log::error!(
                    "{}: refresh timed out, proceeding with stale data",
                    self.label()
                );
            }
        }
    }

    pub fn time_frame_is_valid(&self, play: &PlayEvent) -> (bool, Option<String>) {
        self.engine.time_frame_is_valid(play)
    }

    pub fn already_scrobbled(&self, play: &PlayEvent) -> bool {
        self.engine.already_scrobbled(play, self.client.as_ref())
    }

    /// Submit one play, retrying a bounded number of times when the
    /// destination rate-limits, then record the confirmed submission. A
    /// fatal error (hard quota/ban) resets the lifecycle so the destination
    /// sits out until re-initialized on a later dispatch.
    pub async fn submit_play(&mut self, play: &PlayEvent) -> Result<(), SubmissionError> {
        let max_retries = self.options.max_submit_retries;
        let mut attempt: u32 = 0;
        let record = loop {
            let result =
                with_timeout(self.options.operation_timeout(), self.client.submit(play)).await;
            match result {
                Some(Ok(record)) => break record,
                Some(Err(err)) => {
                    if let Some(hint) = err_retry_wait(&err, attempt, self.options.retry_multiplier)
                    {
                        if attempt < max_retries {
                            attempt += 1;
                            log::warn!(
                                "{}: rate limited, retrying submission in {:.1}s ({}/{})",
                                self.label(),
                                hint.as_secs_f64(),
                                attempt,
                                max_retries
                            );
                            tokio::time::sleep(hint).await;
                            continue;
                        }
                        // retries exhausted, surface as a normal rejection
                        return Err(SubmissionError::Rejected(
                            "rate limited and retries exhausted".to_string(),
                        ));
                    }
                    if err.aborts_batch() {
                        // rate-limit lockout or ban: back to square one
                        self.state.init = InitState::NotInitialized;
                    }
                    return Err(err);
                }
                None => {
                    return Err(SubmissionError::Rejected(
                        "submission timed out".to_string(),
                    ))
                }
            }
        };

        let submit_kind = if play.new_from_source { "New" } else { "Backlog" };
        log::info!(
            "{}: Scrobbled ({}) => ({}) {}",
            self.label(),
            submit_kind,
            play.source,
            play
        );
        self.engine.record_submission(play.clone(), record);
        self.scrobbled_count += 1;

        if self.options.post_submit_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.post_submit_delay_ms)).await;
        }
        Ok(())
    }
}

/// Wait before retrying a rate-limited submission: the server hint when
/// present, otherwise multiplier * (attempt + 1).
fn err_retry_wait(err: &SubmissionError, attempt: u32, multiplier: f64) -> Option<Duration> {
    match err {
        SubmissionError::RateLimited { retry_after } => Some(retry_after.unwrap_or_else(|| {
            Duration::from_secs_f64(multiplier * (attempt + 1) as f64)
        })),
        _ => None,
    }
}
