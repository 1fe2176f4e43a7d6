//! Temporal sampling policy over a frame source.
//!
//! Frame ordinal `n` (0-based, counted over every decoded frame) is yielded
//! iff the warm-up window is disabled or already passed (`n >= 10`) and
//! `n % stride == 0`. An optional cooldown additionally suppresses frames
//! closer than `cooldown` seconds to the last recorded acceptance.

use tracing::{debug, warn};

use facetrace_models::{ScanConfig, WARMUP_FRAMES};

use crate::source::{Frame, FrameSource};

/// Consecutive unreadable frames tolerated before the stream is ended.
const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Lifecycle of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Inside the fixed warm-up window
    WarmingUp,
    /// Yielding frames by stride
    Sampling,
    /// Source finished; terminal
    Exhausted,
}

/// A frame that passed the sampling policy.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Ordinal among all decoded frames
    pub ordinal: u64,
    pub frame: Frame,
}

impl SampledFrame {
    pub fn timestamp(&self) -> f64 {
        self.frame.timestamp
    }
}

/// Lazy, single-pass sampler over a [`FrameSource`].
pub struct FrameSampler<S> {
    source: S,
    stride: u64,
    state: SamplerState,
    next_ordinal: u64,
    cooldown: Option<f64>,
    last_acceptance: Option<f64>,
    frames_decoded: u64,
    frames_in_cooldown: u64,
    frames_unreadable: u64,
}

impl<S: FrameSource> FrameSampler<S> {
    /// Sampler with the stride and warm-up of `config` and no cooldown.
    pub fn new(source: S, config: &ScanConfig) -> Self {
        Self {
            source,
            stride: config.frame_skip_stride.max(1),
            state: if config.enable_warmup {
                SamplerState::WarmingUp
            } else {
                SamplerState::Sampling
            },
            next_ordinal: 0,
            cooldown: None,
            last_acceptance: None,
            frames_decoded: 0,
            frames_in_cooldown: 0,
            frames_unreadable: 0,
        }
    }

    /// Suppress frames within `seconds` of the last acceptance.
    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.cooldown = Some(seconds);
        self
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Total duration of the underlying source, when known.
    pub fn duration(&self) -> Option<f64> {
        self.source.duration()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Start the cooldown window at `timestamp`.
    pub fn record_acceptance(&mut self, timestamp: f64) {
        self.last_acceptance = Some(timestamp);
    }

    pub fn last_acceptance(&self) -> Option<f64> {
        self.last_acceptance
    }

    /// Whether a frame at `timestamp` falls inside the cooldown window.
    pub fn in_cooldown(&self, timestamp: f64) -> bool {
        match (self.cooldown, self.last_acceptance) {
            (Some(cooldown), Some(last)) => timestamp - last < cooldown,
            _ => false,
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_in_cooldown(&self) -> u64 {
        self.frames_in_cooldown
    }

    /// Frames skipped because they could not be converted.
    pub fn frames_unreadable(&self) -> u64 {
        self.frames_unreadable
    }

    /// Next frame that passes the policy, or `None` once exhausted.
    pub fn next_frame(&mut self) -> Option<SampledFrame> {
        let mut consecutive_failures = 0;

        while self.state != SamplerState::Exhausted {
            let ordinal = self.next_ordinal;
            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(frames = self.frames_decoded, "Frame source exhausted");
                    self.state = SamplerState::Exhausted;
                    break;
                }
                Err(e)
                    if e.is_frame_recoverable()
                        && consecutive_failures + 1 < MAX_CONSECUTIVE_FAILURES =>
                {
                    consecutive_failures += 1;
                    self.next_ordinal += 1;
                    self.frames_unreadable += 1;
                    warn!(ordinal, "Skipping unreadable frame: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(ordinal, "Decode error, ending stream: {}", e);
                    self.state = SamplerState::Exhausted;
                    break;
                }
            };
            consecutive_failures = 0;
            self.next_ordinal += 1;
            self.frames_decoded += 1;

            if self.state == SamplerState::WarmingUp {
                if ordinal < WARMUP_FRAMES {
                    continue;
                }
                self.state = SamplerState::Sampling;
            }

            if ordinal % self.stride != 0 {
                continue;
            }

            if self.in_cooldown(frame.timestamp) {
                self.frames_in_cooldown += 1;
                continue;
            }

            return Some(SampledFrame { ordinal, frame });
        }
        None
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = SampledFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}
