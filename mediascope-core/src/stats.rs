// STREAM STATISTICS - Timestamps, byte/frame counters, bitrate derivation
//
// • TimestampTracker: contiguous 90 kHz segments per substream
// • StreamStats: bytes + frames + timestamps, read once at finalize
// • PcrBitrate: multiplex bitrate bracket from PCR intervals
// • Rounding: per-container bitrate rounding constants

use serde::{Deserialize, Serialize};

/// 90 kHz MPEG system clock.
pub const CLOCK_90K: u64 = 90_000;
/// 27 MHz PCR clock.
pub const CLOCK_27M: u64 = 27_000_000;

/// A drop larger than this starts a new segment (1 s at 90 kHz).
pub const DISCONTINUITY_THRESHOLD: u64 = CLOCK_90K;

// ============================================================================
// Timestamp tracker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurationPolicy {
    /// Last segment's max minus first segment's min.
    #[default]
    FullSpan,
    /// Span of the final contiguous run only.
    LastSegment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub min: u64,
    pub max: u64,
}

impl Segment {
    pub fn span(&self) -> u64 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampTracker {
    segments: Vec<Segment>,
    samples: u64,
}

impl TimestampTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, ts: u64) {
        self.samples += 1;
        match self.segments.last_mut() {
            None => self.segments.push(Segment { min: ts, max: ts }),
            Some(current) => {
                if ts.saturating_add(DISCONTINUITY_THRESHOLD) < current.max {
                    tracing::debug!(
                        "timestamp discontinuity: {} after max {}, new segment",
                        ts,
                        current.max
                    );
                    self.segments.push(Segment { min: ts, max: ts });
                } else {
                    current.min = current.min.min(ts);
                    current.max = current.max.max(ts);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn first(&self) -> Option<u64> {
        self.segments.first().map(|s| s.min)
    }

    pub fn last(&self) -> Option<u64> {
        self.segments.last().map(|s| s.max)
    }

    /// Duration in clock ticks; never negative.
    pub fn duration_ticks(&self, policy: DurationPolicy) -> Option<u64> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        Some(match policy {
            DurationPolicy::FullSpan => last.max.saturating_sub(first.min),
            DurationPolicy::LastSegment => last.span(),
        })
    }

    pub fn duration_ms(&self, policy: DurationPolicy) -> Option<u64> {
        self.duration_ticks(policy).map(|t| (t as u128 * 1000 / CLOCK_90K as u128) as u64)
    }
}

// ============================================================================
// Per-substream statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub bytes: u64,
    pub frames: u64,
    pub pts: TimestampTracker,
}

impl StreamStats {
    pub fn add_payload(&mut self, len: usize) {
        self.bytes += len as u64;
    }

    pub fn add_frame(&mut self, pts: Option<u64>) {
        self.frames += 1;
        if let Some(pts) = pts {
            self.pts.observe(pts);
        }
    }

    pub fn duration_ms(&self, policy: DurationPolicy) -> Option<u64> {
        self.pts.duration_ms(policy)
    }
}

// ============================================================================
// Bitrate rounding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Round,
    Truncate,
}

// Each container reproduces the reference tool's own convention.
pub const MKV_VIDEO_ROUNDING: Rounding = Rounding::Round;
pub const MKV_AUDIO_ROUNDING: Rounding = Rounding::Truncate;
pub const AVI_VIDEO_ROUNDING: Rounding = Rounding::Truncate;
pub const AVI_AUDIO_ROUNDING: Rounding = Rounding::Round;
pub const MP4_ROUNDING: Rounding = Rounding::Truncate;
pub const TS_ROUNDING: Rounding = Rounding::Round;
pub const PS_ROUNDING: Rounding = Rounding::Round;

/// bits per second from a byte count and a duration in milliseconds.
pub fn bitrate(bytes: u64, duration_ms: u64, rounding: Rounding) -> Option<u64> {
    if duration_ms == 0 {
        return None;
    }
    let bits = bytes as u128 * 8 * 1000;
    let ms = duration_ms as u128;
    let value = match rounding {
        Rounding::Round => (bits + ms / 2) / ms,
        Rounding::Truncate => bits / ms,
    };
    u64::try_from(value).ok()
}

// ============================================================================
// PCR interval bitrate
// ============================================================================

/// Intervals longer than this are treated as a clock break, not a measurement.
pub const PCR_MAX_INTERVAL: u64 = CLOCK_27M;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcrBitrate {
    last: Option<(u64, u64)>,
    min_bps: Option<u64>,
    max_bps: Option<u64>,
    total_bytes: u64,
    total_ticks: u64,
    pub intervals: u64,
    pub discontinuities: u64,
}

impl PcrBitrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a PCR (27 MHz) seen in the packet starting at `offset`.
    pub fn observe(&mut self, pcr: u64, offset: u64) {
        if let Some((last_pcr, last_offset)) = self.last {
            let ticks = pcr.wrapping_sub(last_pcr);
            if pcr <= last_pcr || ticks > PCR_MAX_INTERVAL || offset <= last_offset {
                self.discontinuities += 1;
            } else {
                let bytes = offset - last_offset;
                let bps = (bytes as u128 * 8 * CLOCK_27M as u128 / ticks as u128) as u64;
                self.min_bps = Some(self.min_bps.map_or(bps, |m| m.min(bps)));
                self.max_bps = Some(self.max_bps.map_or(bps, |m| m.max(bps)));
                self.total_bytes += bytes;
                self.total_ticks += ticks;
                self.intervals += 1;
            }
        }
        self.last = Some((pcr, offset));
    }

    /// Forget the previous PCR (scan jumped to another file region).
    pub fn break_chain(&mut self) {
        self.last = None;
    }

    pub fn bracket(&self) -> Option<(u64, u64)> {
        Some((self.min_bps?, self.max_bps?))
    }

    pub fn mean(&self) -> Option<u64> {
        if self.total_ticks == 0 {
            return None;
        }
        Some((self.total_bytes as u128 * 8 * CLOCK_27M as u128 / self.total_ticks as u128) as u64)
    }
}

// ============================================================================
// Scan planning
// ============================================================================

/// Below this size a file is always scanned completely.
pub const MIN_WINDOW: u64 = 4 * 1024 * 1024;

/// Byte windows to scan for a given parse speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    pub head: u64,
    /// Start of the tail window, if one is needed.
    pub tail_start: Option<u64>,
    pub file_size: u64,
}

impl ScanPlan {
    pub fn new(file_size: u64, parse_speed: f32) -> Self {
        if parse_speed >= 1.0 || file_size <= 2 * MIN_WINDOW {
            return Self {
                head: file_size,
                tail_start: None,
                file_size,
            };
        }
        let window = ((file_size as f64 * parse_speed as f64 / 2.0) as u64).max(MIN_WINDOW);
        if window * 2 >= file_size {
            return Self {
                head: file_size,
                tail_start: None,
                file_size,
            };
        }
        Self {
            head: window,
            tail_start: Some(file_size - window),
            file_size,
        }
    }

    pub fn is_full(&self) -> bool {
        self.tail_start.is_none() && self.head >= self.file_size
    }

    pub fn scanned_bytes(&self) -> u64 {
        match self.tail_start {
            Some(start) => self.head + (self.file_size - start),
            None => self.head,
        }
    }
}
