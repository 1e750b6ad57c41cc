// Match scoring module
// Pure confidence scoring between a candidate play and an existing scrobble

use crate::config::TimeTolerances;
use crate::play::PlayEvent;
use std::collections::HashSet;

/// A candidate scoring at or above this is considered already scrobbled.
pub const MATCH_THRESHOLD: f64 = 0.7;

// Term weights. Reference is reported for transparency but never summed,
// otherwise totals could exceed 1.0.
const REFERENCE_WEIGHT: f64 = 0.5;
const ARTIST_WEIGHT: f64 = 0.2;
const TITLE_WEIGHT: f64 = 0.3;
const TIME_WEIGHT: f64 = 0.5;

/// Result of scoring one existing scrobble against a candidate play.
#[derive(Debug, Clone)]
pub struct MatchScore {
    /// Combined confidence in 0..=1
    pub value: f64,
    /// Human-readable per-term breakdown, in scoring order
    pub breakdown: Vec<String>,
}

impl MatchScore {
    pub fn is_match(&self) -> bool {
        self.value >= MATCH_THRESHOLD
    }

    pub fn summary(&self) -> String {
        format!(
            "Score {:.2} => {}",
            self.value,
            if self.is_match() { "Matched!" } else { "No Match" }
        )
    }
}

/// Score `existing` (a scrobble already known to the destination) against
/// `candidate` (the incoming play). Pure: no side effects, inputs untouched.
///
/// `reference_match` carries the destination-record comparison result when a
/// prior submission exists for this destination; it contributes to the
/// breakdown only. `cleaned_candidate_title` is the candidate title after
/// destination-specific cleanup.
pub fn score(
    existing: &PlayEvent,
    candidate: &PlayEvent,
    reference_match: Option<bool>,
    cleaned_candidate_title: &str,
    tolerances: &TimeTolerances,
) -> MatchScore {
    let artist_term = artist_term(existing, candidate);
    let title_term = title_term(&existing.track, cleaned_candidate_title);
    let time_term = time_term(existing, candidate, tolerances);

    let artist_score = ARTIST_WEIGHT * artist_term;
    let title_score = TITLE_WEIGHT * title_term;
    let time_score = TIME_WEIGHT * time_term;
    let value = artist_score + title_score + time_score;

    let reference_term = match reference_match {
        Some(true) => 1.0,
        _ => 0.0,
    };
    let mut breakdown = vec![format!(
        "Reference: {:.0} * {} = {:.2}",
        reference_term,
        REFERENCE_WEIGHT,
        REFERENCE_WEIGHT * reference_term
    )];
    breakdown.push(format!(
        "Artist: {:.2} * {} = {:.2}",
        artist_term, ARTIST_WEIGHT, artist_score
    ));
    breakdown.push(format!(
        "Title: {:.2} * {} = {:.2}",
        title_term, TITLE_WEIGHT, title_score
    ));
    breakdown.push(format!(
        "Time: {:.1} * {} = {:.2}",
        time_term, TIME_WEIGHT, time_score
    ));

    let mut result = MatchScore { value, breakdown };
    let summary = result.summary();
    result.breakdown.push(summary);
    result
}

/// Share of the candidate's artists also credited on the existing scrobble.
/// An empty candidate artist list scores 0 rather than dividing by zero.
fn artist_term(existing: &PlayEvent, candidate: &PlayEvent) -> f64 {
    if candidate.artists.is_empty() {
        return 0.0;
    }
    let existing_artists: HashSet<String> = existing
        .artists
        .iter()
        .map(|a| a.trim().to_lowercase())
        .collect();
    let candidate_artists: HashSet<String> = candidate
        .artists
        .iter()
        .map(|a| a.trim().to_lowercase())
        .collect();
    let common = candidate_artists.intersection(&existing_artists).count();
    common as f64 / candidate.artists.len() as f64
}

/// Position-agnostic title comparison: share of the candidate's title tokens
/// present in the existing title. Cleanup already happened on the candidate
/// side; the existing title only gets lower-cased.
fn title_term(existing_title: &str, cleaned_candidate_title: &str) -> f64 {
    let candidate_tokens: HashSet<&str> = cleaned_candidate_title
        .split_whitespace()
        .collect();
    if candidate_tokens.is_empty() {
        return 0.0;
    }
    let lowered = existing_title.trim().to_lowercase();
    let existing_tokens: HashSet<&str> = lowered.split_whitespace().collect();
    let common = candidate_tokens.intersection(&existing_tokens).count();
    common as f64 / candidate_tokens.len() as f64
}

/// 1.0 when timestamps are close under the strict tolerance, 0.5 under the
/// fuzzy tolerance, else 0. Missing timestamps on either side score 0.
fn time_term(existing: &PlayEvent, candidate: &PlayEvent, tolerances: &TimeTolerances) -> f64 {
    let (Some(a), Some(b)) = (existing.play_date, candidate.play_date) else {
        return 0.0;
    };
    let diff = (a - b).num_seconds().abs();
    if diff <= tolerances.close_secs {
        1.0
    } else if diff <= tolerances.fuzzy_secs {
        0.5
    } else {
        0.0
    }
}
