// scrobble-relay
// Relays play events discovered from heterogeneous sources into one or more
// scrobble destinations, recording each play at most once per destination.
// Source adapters and concrete destination clients live outside this crate;
// this is the dedup-matching engine and the dispatch orchestrator.

pub mod config;
pub mod dedup;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod matching;
pub mod play;
pub mod text_cleanup;

pub use config::{DestinationOptions, TimeTolerances, VerboseMatchOptions};
pub use dedup::{DedupEngine, MatchOutcome, SubmittedScrobble};
pub use destination::traits::{DestinationRecord, MatchCapabilities, ScrobbleClient};
pub use destination::{Destination, DestinationState, InitState};
pub use dispatch::{DispatchOptions, ScrobbleDispatcher};
pub use error::{AuthError, InitializationError, RefreshError, SubmissionError};
pub use matching::{MatchScore, MATCH_THRESHOLD};
pub use play::PlayEvent;
