// Dispatch orchestrator
// Iterates configured destinations for each incoming batch of plays and
// drives lifecycle, refresh, dedup and submission with error isolation

use crate::config::DestinationOptions;
use crate::destination::traits::ScrobbleClient;
use crate::destination::Destination;
use crate::play::PlayEvent;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Options bag for one dispatch call.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Refresh every destination's window even if it looks current
    pub force_refresh: bool,
    /// Reference time for window staleness; defaults to now
    pub check_time: Option<DateTime<Utc>>,
    /// When non-empty, only destinations named here are dispatched to
    pub destination_filter: HashSet<String>,
    /// Name of the source this batch came from, for log context
    pub origin: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            check_time: None,
            destination_filter: HashSet::new(),
            origin: "source".to_string(),
        }
    }
}

struct RegisteredDestination {
    // cached so filtering and readiness summaries can name destinations
    // without taking the lock
    name: String,
    kind: String,
    label: String,
    destination: Mutex<Destination>,
}

/// Orchestrates scrobbling across all configured destinations.
///
/// Destinations are processed sequentially in registration order; each one
/// sits behind its own mutex, so a second batch arriving for a busy
/// destination queues instead of interleaving. Destinations own disjoint
/// state and a failure in one never affects another's view of the batch.
pub struct ScrobbleDispatcher {
    destinations: Vec<Arc<RegisteredDestination>>,
}

impl Default for ScrobbleDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrobbleDispatcher {
    pub fn new() -> Self {
        Self {
            destinations: Vec::new(),
        }
    }

    /// Register a destination and eagerly attempt initialization and auth.
    /// Failures are logged, not fatal; both are retried on later dispatches.
    pub async fn add_destination(
        &mut self,
        client: Box<dyn ScrobbleClient>,
        options: DestinationOptions,
    ) {
        let mut destination = Destination::new(client, options);
        let label = destination.label();
        log::debug!("Constructing {} destination...", label);
        if !destination.ensure_initialized().await {
            log::error!(
                "{}: failed to initialize. Destination needs a successful initialization before scrobbling.",
                label
            );
        }
        destination.ensure_authenticated().await;

        self.destinations.push(Arc::new(RegisteredDestination {
            name: destination.name().to_string(),
            kind: destination.kind().to_string(),
            label,
            destination: Mutex::new(destination),
        }));
    }

    pub fn destination_names(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.name.clone()).collect()
    }

    /// Scrobbles recorded by one destination since startup.
    pub async fn scrobbled_count(&self, name: &str) -> Option<u64> {
        let entry = self.destinations.iter().find(|d| d.name == name)?;
        let destination = entry.destination.lock().await;
        Some(destination.scrobbled_count())
    }

    /// Readiness summary for health reporting. `selector` narrows to a
    /// destination name or kind; `None` covers everything.
    pub async fn readiness(&self, selector: Option<&str>) -> (bool, Vec<String>) {
        let mut all_ready = true;
        let mut messages = Vec::new();
        for entry in &self.destinations {
            if let Some(wanted) = selector {
                if entry.name != wanted && entry.kind != wanted {
                    continue;
                }
            }
            let destination = entry.destination.lock().await;
            if !destination.is_ready().await {
                all_ready = false;
                messages.push(format!("Destination {} is not ready.", entry.label));
            }
        }
        (all_ready, messages)
    }

    /// Relay a batch of plays to every eligible destination, in input order
    /// per destination. Returns the deduplicated subset of plays newly
    /// scrobbled by at least one destination; a play appears once no matter
    /// how many destinations accepted it. Failures never propagate out --
    /// they show up only in logs and in a smaller result set.
    pub async fn dispatch(&self, plays: &[PlayEvent], options: DispatchOptions) -> Vec<PlayEvent> {
        let check_time = options.check_time.unwrap_or_else(Utc::now);
        let mut newly_scrobbled: Vec<PlayEvent> = Vec::new();

        if self.destinations.is_empty() {
            log::warn!("Cannot scrobble! No destinations are configured.");
            return newly_scrobbled;
        }

        for entry in &self.destinations {
            if !options.destination_filter.is_empty()
                && !options.destination_filter.contains(&entry.name)
            {
                log::debug!(
                    "{}: filtered out by source '{}'",
                    entry.label,
                    options.origin
                );
                continue;
            }

            let mut destination = entry.destination.lock().await;

            if !destination.ensure_initialized().await {
                log::warn!(
                    "{}: cannot scrobble because it could not be initialized",
                    entry.label
                );
                continue;
            }
            if !destination.ensure_authenticated().await {
                continue;
            }
            if !destination.is_ready().await {
                log::warn!("{}: cannot scrobble because it is not ready", entry.label);
                continue;
            }

            if destination.needs_refresh(options.force_refresh, check_time) {
                destination.refresh().await;
            }

            for play in plays {
                if play.play_date.is_none() {
                    log::warn!(
                        "{}: play {} has no timestamp and cannot be evaluated, skipping",
                        entry.label,
                        play
                    );
                    continue;
                }

                let (time_frame_valid, reason) = destination.time_frame_is_valid(play);
                if !time_frame_valid {
                    log::debug!(
                        "{}: will not scrobble {} from source '{}' because it {}",
                        entry.label,
                        play,
                        options.origin,
                        reason.unwrap_or_default()
                    );
                    continue;
                }

                if destination.already_scrobbled(play) {
                    continue;
                }

                match destination.submit_play(play).await {
                    Ok(()) => {
                        if !newly_scrobbled.iter().any(|p| p.same_play(play)) {
                            newly_scrobbled.push(play.clone());
                        }
                    }
                    Err(e) => {
                        log::error!("{}: error while scrobbling {}: {}", entry.label, play, e);
                        if e.aborts_batch() {
                            log::error!(
                                "{}: abandoning the remaining plays in this batch",
                                entry.label
                            );
                            break;
                        }
                    }
                }
            }
        }

        newly_scrobbled
    }
}
