// Common traits for scrobble destinations
// Concrete destination clients live outside this crate and implement these

use crate::error::{AuthError, InitializationError, RefreshError, SubmissionError};
use crate::play::PlayEvent;
use async_trait::async_trait;

/// A destination's own shape of a successfully recorded scrobble. Each
/// service returns a differently structured confirmation payload, so this is
/// an opaque associative value; the engine only looks at it through the
/// capabilities below.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRecord(pub serde_json::Value);

/// Matching capabilities a destination supplies to the dedup engine.
pub trait MatchCapabilities: Send + Sync {
    /// Destination-specific cleanup applied to a candidate title before it
    /// is tokenized for matching. Default is lower-case and trim; services
    /// that embed guest artists in titles override this (see
    /// [`crate::text_cleanup::TextCleaner::feat_stripper`]).
    fn clean_search_title(&self, play: &PlayEvent) -> String {
        play.track.trim().to_lowercase()
    }

    /// Extract a play view from one of this destination's records, for
    /// data-invariant comparison against recent scrobbles. `None` when the
    /// record shape carries too little to compare.
    fn play_from_record(&self, _record: &DestinationRecord) -> Option<PlayEvent> {
        None
    }
}

/// Common trait for all scrobble destinations.
///
/// Every async operation here is a potentially long-running network call;
/// the dispatcher wraps each in a caller-supplied timeout and treats a
/// timeout like a returned failure.
#[async_trait]
pub trait ScrobbleClient: MatchCapabilities + Send + Sync {
    /// Instance name, unique across configured destinations
    fn name(&self) -> &str;

    /// Service kind, e.g. "maloja" or "lastfm"
    fn kind(&self) -> &str;

    fn requires_auth(&self) -> bool {
        false
    }

    /// Whether authentication needs a human (e.g. a browser round-trip) and
    /// therefore cannot be attempted unattended
    fn requires_auth_interaction(&self) -> bool {
        false
    }

    /// Verify the destination is reachable and minimally configured
    async fn initialize(&self) -> Result<(), InitializationError>;

    /// Verify or silently re-establish credentials
    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    /// Service-level health probe beyond lifecycle/auth state, e.g. a
    /// database-rebuild check. Defaults to healthy.
    async fn check_health(&self) -> bool {
        true
    }

    /// Fetch the destination's recent scrobbles, most recent window only.
    /// The caller replaces its window wholesale with the result.
    async fn recent_scrobbles(&self) -> Result<Vec<PlayEvent>, RefreshError>;

    /// Submit one play. Implementations may sleep internally to respect
    /// per-second rate limits; longer throttles belong in
    /// [`crate::config::DestinationOptions::post_submit_delay_ms`].
    async fn submit(&self, play: &PlayEvent) -> Result<DestinationRecord, SubmissionError>;
}
