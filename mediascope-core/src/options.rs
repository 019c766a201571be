// PROBE OPTIONS - Per-run configuration
//
// Loaded from JSON (every field optional) or built in code.
// parse_speed is clamped on every path that reads it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::DurationPolicy;

pub const DEFAULT_PARSE_SPEED: f32 = 0.5;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid options: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ProbeOptions {
    /// 0.0 scans header regions only, 1.0 scans the whole file.
    pub parse_speed: f32,
    /// Aggregate numbered sibling files of transport streams.
    pub test_continuous_file_names: bool,
    pub duration_policy: DurationPolicy,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            parse_speed: DEFAULT_PARSE_SPEED,
            test_continuous_file_names: false,
            duration_policy: DurationPolicy::FullSpan,
        }
    }
}

impl ProbeOptions {
    pub fn from_json(text: &str) -> Result<Self, OptionsError> {
        let mut options: ProbeOptions = serde_json::from_str(text)?;
        options.parse_speed = clamp_speed(options.parse_speed);
        Ok(options)
    }

    pub fn from_file(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_parse_speed(mut self, speed: f32) -> Self {
        self.parse_speed = clamp_speed(speed);
        self
    }

    pub fn with_continuous(mut self, enabled: bool) -> Self {
        self.test_continuous_file_names = enabled;
        self
    }

    pub fn with_duration_policy(mut self, policy: DurationPolicy) -> Self {
        self.duration_policy = policy;
        self
    }

    /// Effective parse speed in 0.0..=1.0.
    pub fn speed(&self) -> f32 {
        clamp_speed(self.parse_speed)
    }
}

fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        DEFAULT_PARSE_SPEED
    } else {
        speed.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = ProbeOptions::default();
        assert_eq!(o.speed(), 0.5);
        assert!(!o.test_continuous_file_names);
        assert_eq!(o.duration_policy, DurationPolicy::FullSpan);
    }

    #[test]
    fn json_partial_and_clamped() {
        let o = ProbeOptions::from_json(r#"{"parse_speed": 4.0}"#).unwrap();
        assert_eq!(o.parse_speed, 1.0);
        assert_eq!(o.duration_policy, DurationPolicy::FullSpan);

        let o = ProbeOptions::from_json(
            r#"{"test_continuous_file_names": true, "duration_policy": "LastSegment"}"#,
        )
        .unwrap();
        assert!(o.test_continuous_file_names);
        assert_eq!(o.duration_policy, DurationPolicy::LastSegment);
        assert!(ProbeOptions::from_json("{not json").is_err());
    }

    #[test]
    fn builder_clamps() {
        assert_eq!(ProbeOptions::default().with_parse_speed(-3.0).speed(), 0.0);
        assert_eq!(ProbeOptions::default().with_parse_speed(f32::NAN).speed(), 0.5);
        let mut raw = ProbeOptions::default();
        raw.parse_speed = 7.5;
        assert_eq!(raw.speed(), 1.0);
    }
}
