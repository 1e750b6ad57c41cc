// Configuration management module
// Handles loading and validating per-destination dispatch options

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Verbose match diagnostics. Two independent flags control whether the
/// dedup engine logs on a match and/or on a miss; `confidence_breakdown`
/// switches between the full term-by-term dump and a one-line summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerboseMatchOptions {
    #[serde(default)]
    pub on_match: bool,

    #[serde(default)]
    pub on_no_match: bool,

    #[serde(default)]
    pub confidence_breakdown: bool,
}

/// Time tolerances for the scorer's time term. "Close" and "fuzzy" are
/// policy knobs per destination, not part of the algorithm's correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeTolerances {
    /// Strict tolerance in seconds (clock skew between source and destination)
    pub close_secs: i64,

    /// Wider tolerance in seconds, scored at half weight
    pub fuzzy_secs: i64,
}

impl Default for TimeTolerances {
    fn default() -> Self {
        Self {
            close_secs: 10,
            fuzzy_secs: 60,
        }
    }
}

/// Options for a single scrobble destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationOptions {
    /// Refresh recent scrobbles from the destination before dispatching
    pub refresh_enabled: bool,

    /// Check for existing scrobbles before submitting. Disabling this turns
    /// every dedup check into an immediate "not recorded".
    pub check_existing_scrobbles: bool,

    /// Verbose match diagnostics
    #[serde(default)]
    pub verbose: VerboseMatchOptions,

    /// Time tolerances for fuzzy matching
    #[serde(default)]
    pub tolerances: TimeTolerances,

    /// Grace window in seconds for the exact-match fast path, for
    /// destinations with imprecise timestamps. 0 requires identical
    /// timestamps.
    pub submitted_grace_secs: i64,

    /// Maximum retries for a rate-limited submission
    pub max_submit_retries: u32,

    /// Backoff multiplier in seconds when the destination supplies no
    /// retry-after hint; the wait grows linearly with the attempt number
    pub retry_multiplier: f64,

    /// Timeout in seconds applied to each network-bound destination
    /// operation. None disables the timeout.
    pub operation_timeout_secs: Option<u64>,

    /// Artificial delay in milliseconds after each successful submission,
    /// for destinations with per-second rate limits
    pub post_submit_delay_ms: u64,
}

impl Default for DestinationOptions {
    fn default() -> Self {
        Self {
            refresh_enabled: true,
            check_existing_scrobbles: true,
            verbose: VerboseMatchOptions::default(),
            tolerances: TimeTolerances::default(),
            submitted_grace_secs: 0,
            max_submit_retries: 1,
            retry_multiplier: 1.5,
            operation_timeout_secs: Some(30),
            post_submit_delay_ms: 0,
        }
    }
}

impl DestinationOptions {
    /// Timeout applied to each network-bound destination operation
    pub fn operation_timeout(&self) -> Option<std::time::Duration> {
        self.operation_timeout_secs
            .map(std::time::Duration::from_secs)
    }

    /// Parse options from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: DestinationOptions =
            toml::from_str(content).context("Failed to parse destination options")?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {:?}", path))?;
        Self::from_toml_str(&content)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.tolerances.close_secs < 0 || self.tolerances.fuzzy_secs < 0 {
            anyhow::bail!("time tolerances must not be negative");
        }
        if self.tolerances.fuzzy_secs < self.tolerances.close_secs {
            anyhow::bail!("fuzzy_secs must be greater than or equal to close_secs");
        }
        if self.submitted_grace_secs < 0 {
            anyhow::bail!("submitted_grace_secs must not be negative");
        }
        if self.retry_multiplier <= 0.0 {
            anyhow::bail!("retry_multiplier must be greater than 0");
        }
        if self.verbose.on_match || self.verbose.on_no_match {
            log::warn!("Verbose matching may produce noisy logs! Use with care.");
        }
        Ok(())
    }
}
