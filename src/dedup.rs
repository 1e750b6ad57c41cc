// Dedup engine
// Per-destination memory of recent and submitted scrobbles, and the decision
// procedure for "already recorded" vs "not recorded"

use crate::config::DestinationOptions;
use crate::destination::traits::{DestinationRecord, MatchCapabilities};
use crate::matching::{self, MatchScore};
use crate::play::PlayEvent;
use chrono::{DateTime, Utc};

/// A play this destination has confirmed during the current process
/// lifetime, paired with the destination's own record of it. Never mutated;
/// pruned only when a refresh moves the window past the play.
#[derive(Debug, Clone)]
pub struct SubmittedScrobble {
    pub play: PlayEvent,
    pub record: DestinationRecord,
}

/// The destination's recent-scrobble feed, replaced wholesale on refresh.
#[derive(Debug, Clone)]
struct RecentScrobbleWindow {
    /// Oldest to newest
    scrobbles: Vec<PlayEvent>,
    oldest_scrobble_time: DateTime<Utc>,
    newest_scrobble_time: Option<DateTime<Utc>>,
    last_refreshed: DateTime<Utc>,
}

/// Outcome of the richer match search, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Exact hit in the submitted set
    pub exact: Option<SubmittedScrobble>,
    /// Fuzzy hit in the recent window
    pub fuzzy: Option<PlayEvent>,
    /// Confidence of the winning candidate, or of the closest one on a miss
    pub confidence: f64,
    pub breakdown: Vec<String>,
    /// Closest-scoring recent scrobble regardless of outcome
    pub closest: Option<PlayEvent>,
}

impl MatchOutcome {
    pub fn matched(&self) -> bool {
        self.exact.is_some() || self.fuzzy.is_some()
    }

    fn none(breakdown: Vec<String>) -> Self {
        Self {
            exact: None,
            fuzzy: None,
            confidence: 0.0,
            breakdown,
            closest: None,
        }
    }
}

/// Decides, for one destination, whether an incoming play has already been
/// recorded. Owns the destination's short-term memory; never mutates its
/// inputs and has no side effects beyond logging.
pub struct DedupEngine {
    options: DestinationOptions,
    submitted: Vec<SubmittedScrobble>,
    window: RecentScrobbleWindow,
}

impl DedupEngine {
    pub fn new(options: DestinationOptions) -> Self {
        Self {
            options,
            submitted: Vec::new(),
            window: RecentScrobbleWindow {
                scrobbles: Vec::new(),
                // anything older than engine creation is unverifiable until
                // the first refresh tells us otherwise
                oldest_scrobble_time: Utc::now(),
                newest_scrobble_time: None,
                last_refreshed: DateTime::UNIX_EPOCH,
            },
        }
    }

    pub fn oldest_scrobble_time(&self) -> DateTime<Utc> {
        self.window.oldest_scrobble_time
    }

    pub fn newest_scrobble_time(&self) -> Option<DateTime<Utc>> {
        self.window.newest_scrobble_time
    }

    pub fn recent_scrobbles(&self) -> &[PlayEvent] {
        &self.window.scrobbles
    }

    pub fn submitted_scrobbles(&self) -> &[SubmittedScrobble] {
        &self.submitted
    }

    pub fn last_refreshed(&self) -> DateTime<Utc> {
        self.window.last_refreshed
    }

    /// Whether the window is stale relative to the dispatch check time.
    pub fn needs_refresh(&self, force: bool, check_time: DateTime<Utc>) -> bool {
        force || self.window.last_refreshed < check_time
    }

    /// Stamp the window as checked without touching its contents, used when
    /// refreshing is disabled or the fetch failed.
    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.window.last_refreshed = now;
    }

    /// Replace the recent window with a fresh fetch from the destination.
    /// Bounds are re-derived and submitted scrobbles that fell outside the
    /// new window are pruned; an empty fetch leaves the bounds untouched.
    pub fn replace_recent(&mut self, mut scrobbles: Vec<PlayEvent>, now: DateTime<Utc>) {
        scrobbles.sort_by_key(|p| p.play_date.unwrap_or(DateTime::UNIX_EPOCH));
        if let (Some(first), Some(last)) = (scrobbles.first(), scrobbles.last()) {
            if let Some(oldest) = first.play_date {
                self.window.oldest_scrobble_time = oldest;
            }
            self.window.newest_scrobble_time = last.play_date;
        }
        self.window.scrobbles = scrobbles;
        self.window.last_refreshed = now;

        let oldest = self.window.oldest_scrobble_time;
        let before = self.submitted.len();
        self.submitted
            .retain(|s| matches!(s.play.play_date, Some(d) if d > oldest));
        let pruned = before - self.submitted.len();
        if pruned > 0 {
            log::debug!(
                "Pruned {} submitted scrobbles that fell outside the refreshed window",
                pruned
            );
        }
    }

    /// Record a confirmed submission.
    pub fn record_submission(&mut self, play: PlayEvent, record: DestinationRecord) {
        self.submitted.push(SubmittedScrobble { play, record });
    }

    /// A play is only eligible if it is strictly newer than the oldest
    /// scrobble this destination is known to hold; the recent feed is a
    /// sliding window and anything older than its tail is unverifiable.
    /// Plays without a timestamp must be rejected before reaching this.
    pub fn time_frame_is_valid(&self, play: &PlayEvent) -> (bool, Option<String>) {
        let Some(play_date) = play.play_date else {
            return (false, Some("play has no timestamp".to_string()));
        };
        let oldest = self.window.oldest_scrobble_time;
        if play_date > oldest {
            (true, None)
        } else {
            let behind = (oldest - play_date).num_seconds();
            (
                false,
                Some(format!(
                    "occurred {}s before the oldest scrobble returned by this destination ({})",
                    behind,
                    oldest.to_rfc3339()
                )),
            )
        }
    }

    /// Data-invariant scan of the submitted set. Returns the entry whose
    /// timestamp also lines up (exactly, or within the grace window for
    /// time-imprecise destinations) plus every data-invariant match.
    fn find_submitted(&self, play: &PlayEvent) -> (Option<&SubmittedScrobble>, Vec<&SubmittedScrobble>) {
        let data_matches: Vec<&SubmittedScrobble> = self
            .submitted
            .iter()
            .filter(|s| s.play.data_match(play))
            .collect();

        let grace = self.options.submitted_grace_secs;
        let exact = data_matches
            .iter()
            .find(|s| match (s.play.play_date, play.play_date) {
                (Some(a), Some(b)) => (a - b).num_seconds().abs() <= grace,
                (None, None) => true,
                _ => false,
            })
            .copied();

        (exact, data_matches)
    }

    /// Full match search, short-circuiting in order: submitted-set fast
    /// path, empty-window early out, then a fuzzy scan of the recent window.
    pub fn find_match(&self, play: &PlayEvent, caps: &dyn MatchCapabilities) -> MatchOutcome {
        let (exact, data_matches) = self.find_submitted(play);

        if let Some(exact) = exact {
            return MatchOutcome {
                exact: Some(exact.clone()),
                fuzzy: None,
                confidence: 1.0,
                breakdown: vec!["Exact match found in previously scrobbled plays".to_string()],
                closest: None,
            };
        }

        // cannot positively confirm anything against an empty window; err
        // toward allowing submission
        if self.window.scrobbles.is_empty() {
            return MatchOutcome::none(vec![
                "No recent scrobbles returned from destination".to_string()
            ]);
        }

        // a data-invariant submission without a matching timestamp still
        // anchors the reference term for the fuzzy scan
        let reference_play = data_matches
            .first()
            .and_then(|s| caps.play_from_record(&s.record));

        let cleaned_title = caps.clean_search_title(play);

        let mut closest: Option<(MatchScore, &PlayEvent)> = None;
        for existing in &self.window.scrobbles {
            let reference_match = reference_play
                .as_ref()
                .map(|reference| existing.data_match(reference));
            let score = matching::score(
                existing,
                play,
                reference_match,
                &cleaned_title,
                &self.options.tolerances,
            );

            let is_match = score.is_match();
            if score.value > 0.0
                && closest
                    .as_ref()
                    .map_or(true, |(best, _)| best.value <= score.value)
            {
                closest = Some((score.clone(), existing));
            }
            if is_match {
                return MatchOutcome {
                    exact: None,
                    fuzzy: Some(existing.clone()),
                    confidence: score.value,
                    breakdown: self.breakdown_for(&score),
                    closest: Some(existing.clone()),
                };
            }
        }

        match closest {
            Some((score, existing)) => MatchOutcome {
                exact: None,
                fuzzy: None,
                confidence: score.value,
                breakdown: self.breakdown_for(&score),
                closest: Some(existing.clone()),
            },
            None => MatchOutcome::none(vec!["None".to_string()]),
        }
    }

    fn breakdown_for(&self, score: &MatchScore) -> Vec<String> {
        if self.options.verbose.confidence_breakdown {
            score.breakdown.clone()
        } else {
            vec![score.summary()]
        }
    }

    /// The dispatch-path decision: has this destination already recorded the
    /// play? Emits the verbose diagnostic line when enabled.
    pub fn already_scrobbled(&self, play: &PlayEvent, caps: &dyn MatchCapabilities) -> bool {
        if !self.options.check_existing_scrobbles {
            if self.options.verbose.on_no_match {
                log::debug!(
                    "(Existing Check) Source: {} => No Match because existing scrobble check is disabled",
                    play
                );
            }
            return false;
        }

        let outcome = self.find_match(play, caps);
        let matched = outcome.matched();

        if (matched && self.options.verbose.on_match)
            || (!matched && self.options.verbose.on_no_match)
        {
            let detail = match &outcome.closest {
                Some(scrobble) => format!(
                    "Closest Scrobble: {} => {}",
                    scrobble,
                    outcome.breakdown.join(" | ")
                ),
                None => outcome.breakdown.join(" | "),
            };
            log::debug!("(Existing Check) Source: {} => {}", play, detail);
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    struct DefaultCaps;
    impl MatchCapabilities for DefaultCaps {}

    fn play_at(track: &str, artists: &[&str], date: DateTime<Utc>) -> PlayEvent {
        let mut play =
            PlayEvent::new(track, artists.iter().map(|s| s.to_string()).collect());
        play.play_date = Some(date);
        play
    }

    fn record() -> DestinationRecord {
        DestinationRecord(json!({"status": "ok"}))
    }

    #[test]
    fn empty_window_and_no_submissions_means_not_recorded() {
        let engine = DedupEngine::new(DestinationOptions::default());
        let play = play_at("Song A", &["Artist X"], Utc::now());
        assert!(!engine.already_scrobbled(&play, &DefaultCaps));
    }

    #[test]
    fn exact_submitted_match_short_circuits() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let play = play_at("Song A", &["Artist X"], Utc::now());
        engine.record_submission(play.clone(), record());

        let outcome = engine.find_match(&play, &DefaultCaps);
        assert!(outcome.exact.is_some());
        assert_eq!(outcome.confidence, 1.0);
        assert!(engine.already_scrobbled(&play, &DefaultCaps));
    }

    #[test]
    fn submitted_match_requires_timestamp_without_grace() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        engine.record_submission(play_at("Song A", &["Artist X"], t0), record());

        // same data, 30s off, default grace of 0, empty window
        let candidate = play_at("Song A", &["Artist X"], t0 + Duration::seconds(30));
        assert!(!engine.already_scrobbled(&candidate, &DefaultCaps));
    }

    #[test]
    fn grace_window_tolerates_imprecise_timestamps() {
        let mut options = DestinationOptions::default();
        options.submitted_grace_secs = 60;
        let mut engine = DedupEngine::new(options);
        let t0 = Utc::now();
        engine.record_submission(play_at("Song A", &["Artist X"], t0), record());

        let candidate = play_at("Song A", &["Artist X"], t0 + Duration::seconds(30));
        let outcome = engine.find_match(&candidate, &DefaultCaps);
        assert!(outcome.exact.is_some());
    }

    #[test]
    fn fuzzy_match_against_recent_window() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        engine.replace_recent(
            vec![play_at("song a", &["artist x"], t0 + Duration::seconds(2))],
            t0,
        );

        let candidate = play_at("Song A", &["Artist X"], t0);
        let outcome = engine.find_match(&candidate, &DefaultCaps);
        assert!(outcome.exact.is_none());
        assert!(outcome.fuzzy.is_some());
        assert!(outcome.confidence >= matching::MATCH_THRESHOLD);
        assert!(engine.already_scrobbled(&candidate, &DefaultCaps));
    }

    #[test]
    fn low_scoring_window_reports_closest_but_no_match() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        engine.replace_recent(
            vec![play_at("something else", &["other artist"], t0 - Duration::hours(2))],
            t0,
        );

        let candidate = play_at("Song A", &["Artist X"], t0);
        let outcome = engine.find_match(&candidate, &DefaultCaps);
        assert!(!outcome.matched());
        assert!(outcome.confidence < matching::MATCH_THRESHOLD);
    }

    #[test]
    fn disabled_check_bypasses_everything() {
        let mut options = DestinationOptions::default();
        options.check_existing_scrobbles = false;
        let mut engine = DedupEngine::new(options);
        let play = play_at("Song A", &["Artist X"], Utc::now());
        engine.record_submission(play.clone(), record());

        // a guaranteed duplicate, but the policy bypass wins
        assert!(!engine.already_scrobbled(&play, &DefaultCaps));
    }

    #[test]
    fn replace_recent_orders_window_and_derives_bounds() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        let newer = play_at("newer", &["a"], t0);
        let older = play_at("older", &["a"], t0 - Duration::hours(1));
        engine.replace_recent(vec![newer.clone(), older.clone()], t0);

        assert_eq!(engine.recent_scrobbles().first().unwrap().track, "older");
        assert_eq!(engine.oldest_scrobble_time(), older.play_date.unwrap());
        assert_eq!(engine.newest_scrobble_time(), newer.play_date);
    }

    #[test]
    fn refresh_prunes_submissions_outside_window() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        engine.record_submission(play_at("old", &["a"], t0 - Duration::hours(3)), record());
        engine.record_submission(play_at("new", &["a"], t0), record());

        engine.replace_recent(vec![play_at("anchor", &["b"], t0 - Duration::hours(1))], t0);
        assert_eq!(engine.submitted_scrobbles().len(), 1);
        assert_eq!(engine.submitted_scrobbles()[0].play.track, "new");
    }

    #[test]
    fn empty_refresh_leaves_bounds_untouched() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let before = engine.oldest_scrobble_time();
        engine.replace_recent(Vec::new(), Utc::now());
        assert_eq!(engine.oldest_scrobble_time(), before);
        assert!(engine.recent_scrobbles().is_empty());
    }

    #[test]
    fn time_frame_rejects_plays_at_or_before_oldest() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let t0 = Utc::now();
        engine.replace_recent(vec![play_at("anchor", &["a"], t0)], t0);

        let (valid, reason) = engine.time_frame_is_valid(&play_at("x", &["a"], t0));
        assert!(!valid);
        assert!(reason.unwrap().contains("oldest scrobble"));

        let (valid, _) = engine.time_frame_is_valid(&play_at(
            "x",
            &["a"],
            t0 - Duration::seconds(30),
        ));
        assert!(!valid);

        let (valid, reason) =
            engine.time_frame_is_valid(&play_at("x", &["a"], t0 + Duration::seconds(1)));
        assert!(valid);
        assert!(reason.is_none());
    }

    #[test]
    fn needs_refresh_compares_check_time() {
        let mut engine = DedupEngine::new(DestinationOptions::default());
        let now = Utc::now();
        assert!(engine.needs_refresh(false, now));
        engine.mark_checked(now);
        assert!(!engine.needs_refresh(false, now));
        assert!(engine.needs_refresh(true, now));
        assert!(engine.needs_refresh(false, now + Duration::seconds(1)));
    }

    #[test]
    fn reference_record_feeds_fuzzy_scan() {
        struct RecordCaps;
        impl MatchCapabilities for RecordCaps {
            fn play_from_record(&self, record: &DestinationRecord) -> Option<PlayEvent> {
                let track = record.0.get("track")?.as_str()?;
                Some(PlayEvent::new(track, vec!["artist x".to_string()]))
            }
        }

        let mut options = DestinationOptions::default();
        options.verbose.confidence_breakdown = true;
        let mut engine = DedupEngine::new(options);
        let t0 = Utc::now();

        // data-invariant submission with a timestamp too far off for the
        // fast path, but whose record anchors the reference term
        engine.record_submission(
            play_at("Song A", &["artist x"], t0 - Duration::hours(1)),
            DestinationRecord(json!({"track": "song a"})),
        );
        // window tail older than the submission so the prune keeps it
        engine.replace_recent(
            vec![
                play_at("filler", &["someone"], t0 - Duration::hours(2)),
                play_at("song a", &["artist x"], t0),
            ],
            t0,
        );

        let candidate = play_at("Song A", &["Artist X"], t0);
        let outcome = engine.find_match(&candidate, &RecordCaps);
        assert!(outcome.fuzzy.is_some());
        assert!(outcome
            .breakdown
            .iter()
            .any(|line| line.starts_with("Reference: 1")));
    }
}
