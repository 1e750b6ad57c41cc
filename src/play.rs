// Play event data model
// Immutable value describing one listen, as reported by a source

use chrono::{DateTime, Utc};
use std::fmt;

/// One discrete listening instance of a track.
///
/// Sources disagree on field completeness and timestamp semantics
/// (playback start vs finish), so everything beyond the title is optional
/// and `play_date` is treated as approximate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    pub track: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    /// Track length in seconds
    pub duration_secs: Option<u64>,
    /// When playback started or finished, depending on the source
    pub play_date: Option<DateTime<Utc>>,

    /// Name of the source that observed this play
    pub source: String,
    /// Freshly observed vs backlog/historical replay
    pub new_from_source: bool,

    // Opaque pass-through metadata, never used by matching
    pub track_id: Option<String>,
    pub url: Option<String>,
    pub device_id: Option<String>,
    pub progress_secs: Option<u64>,
}

impl PlayEvent {
    pub fn new(track: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            track: track.into(),
            artists,
            album: None,
            duration_secs: None,
            play_date: None,
            source: "source".to_string(),
            new_from_source: true,
            track_id: None,
            url: None,
            device_id: None,
            progress_secs: None,
        }
    }

    /// Data-invariant equality: normalized track, artists, album and
    /// duration. Timestamps are deliberately ignored so the same listen
    /// reported with skewed clocks still compares equal.
    pub fn data_match(&self, other: &PlayEvent) -> bool {
        if normalize(&self.track) != normalize(&other.track) {
            return false;
        }
        if self.artists.len() != other.artists.len() {
            return false;
        }
        let mut mine: Vec<String> = self.artists.iter().map(|a| normalize(a)).collect();
        let mut theirs: Vec<String> = other.artists.iter().map(|a| normalize(a)).collect();
        mine.sort();
        theirs.sort();
        if mine != theirs {
            return false;
        }
        let album_a = self.album.as_deref().map(normalize);
        let album_b = other.album.as_deref().map(normalize);
        album_a == album_b && self.duration_secs == other.duration_secs
    }

    /// Data match plus identical play date. Used when deduplicating the
    /// dispatch result set across destinations.
    pub fn same_play(&self, other: &PlayEvent) -> bool {
        self.data_match(other) && self.play_date == other.play_date
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

// Log lines truncate long titles so columns stay readable
const DISPLAY_TRUNCATE: usize = 27;

fn truncate(s: &str) -> String {
    if s.chars().count() <= DISPLAY_TRUNCATE {
        s.to_string()
    } else {
        let shortened: String = s.chars().take(DISPLAY_TRUNCATE).collect();
        format!("{}...", shortened)
    }
}

impl fmt::Display for PlayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let artists = truncate(&self.artists.join(" / "));
        let track = truncate(&self.track);
        match self.play_date {
            Some(dt) => write!(f, "{} - {} @ {}", artists, track, dt.to_rfc3339()),
            None => write!(f, "{} - {} @ <no timestamp>", artists, track),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn play(track: &str, artists: &[&str]) -> PlayEvent {
        PlayEvent::new(track, artists.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn data_match_ignores_case_and_whitespace() {
        let a = play("Song A", &["Artist X"]);
        let b = play("  song a ", &["artist x"]);
        assert!(a.data_match(&b));
    }

    #[test]
    fn data_match_ignores_timestamp() {
        let mut a = play("Song A", &["Artist X"]);
        let mut b = play("Song A", &["Artist X"]);
        a.play_date = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        b.play_date = Some(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
        assert!(a.data_match(&b));
        assert!(!a.same_play(&b));
    }

    #[test]
    fn data_match_considers_album_and_duration() {
        let mut a = play("Song A", &["Artist X"]);
        let mut b = play("Song A", &["Artist X"]);
        a.album = Some("Album".to_string());
        assert!(!a.data_match(&b));
        b.album = Some("ALBUM".to_string());
        assert!(a.data_match(&b));
        a.duration_secs = Some(180);
        assert!(!a.data_match(&b));
    }

    #[test]
    fn data_match_artist_order_is_irrelevant() {
        let a = play("Song A", &["Artist X", "Artist Y"]);
        let b = play("Song A", &["Artist Y", "Artist X"]);
        assert!(a.data_match(&b));
        let c = play("Song A", &["Artist X"]);
        assert!(!a.data_match(&c));
    }

    #[test]
    fn display_truncates_long_titles() {
        let p = play(
            "An Incredibly Long Track Title That Goes On",
            &["Artist X"],
        );
        let rendered = format!("{}", p);
        assert!(rendered.contains("..."));
        assert!(rendered.contains("<no timestamp>"));
    }
}
