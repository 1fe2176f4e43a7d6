//! Descriptors for assembling selected sightings into a final video.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default length of each clip in the final video.
pub const DEFAULT_CLIP_SECS: f64 = 1.5;

/// Crossfade length used by [`Transition::Fade`].
pub const CROSSFADE_SECS: f64 = 0.5;

/// One segment of the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipDescriptor {
    /// Source video
    pub source: PathBuf,
    /// Start time in the source, in seconds
    pub start: f64,
    /// Requested length in seconds (clamped to the source at render time)
    #[serde(default = "default_clip_secs")]
    pub duration: f64,
}

fn default_clip_secs() -> f64 {
    DEFAULT_CLIP_SECS
}

impl ClipDescriptor {
    pub fn new(source: impl Into<PathBuf>, start: f64) -> Self {
        Self {
            source: source.into(),
            start,
            duration: DEFAULT_CLIP_SECS,
        }
    }

    /// Clip length once limited by the source duration.
    pub fn clamped_duration(&self, source_duration: Option<f64>) -> f64 {
        match source_duration {
            Some(total) => (total - self.start).min(self.duration).max(0.0),
            None => self.duration,
        }
    }
}

/// Joining style between consecutive clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Hard cut
    #[default]
    None,
    /// Crossfade of [`CROSSFADE_SECS`]
    Fade,
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Transition::None),
            "fade" => Ok(Transition::Fade),
            other => Err(format!("unknown transition '{}'", other)),
        }
    }
}

/// Visual effect applied to every clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    FadeIn { duration: f64 },
    FadeOut { duration: f64 },
    MirrorX,
    MirrorY,
    BlackWhite,
    InvertColors,
    Resize { height: u32 },
    SpeedX { factor: f64 },
    Rotate { angle: f64 },
}

impl Effect {
    /// Names accepted by [`Effect::from_params`].
    pub const NAMES: &'static [&'static str] = &[
        "fadein",
        "fadeout",
        "mirror_x",
        "mirror_y",
        "blackwhite",
        "invert_colors",
        "resize",
        "speedx",
        "rotate",
    ];

    /// Build an effect from its name and string parameters.
    ///
    /// Missing or unparsable parameters fall back to their defaults
    /// (fade 0.5 s, height 360, factor 1.0, angle 0). Returns `None` for an
    /// unknown name or `"none"`.
    pub fn from_params(name: &str, params: &HashMap<String, String>) -> Option<Self> {
        fn param<T: FromStr>(params: &HashMap<String, String>, key: &str, default: T) -> T {
            params
                .get(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        let effect = match name.trim().to_ascii_lowercase().as_str() {
            "fadein" => Effect::FadeIn {
                duration: param(params, "duration", 0.5),
            },
            "fadeout" => Effect::FadeOut {
                duration: param(params, "duration", 0.5),
            },
            "mirror_x" => Effect::MirrorX,
            "mirror_y" => Effect::MirrorY,
            "blackwhite" => Effect::BlackWhite,
            "invert_colors" => Effect::InvertColors,
            "resize" => Effect::Resize {
                height: param(params, "height", 360),
            },
            "speedx" => Effect::SpeedX {
                factor: param(params, "factor", 1.0),
            },
            "rotate" => Effect::Rotate {
                angle: param(params, "angle", 0.0),
            },
            _ => return None,
        };
        Some(effect)
    }

    /// Playback speed multiplier this effect applies.
    pub fn speed_factor(&self) -> f64 {
        match self {
            Effect::SpeedX { factor } if *factor > 0.0 => *factor,
            _ => 1.0,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Effect::FadeIn { .. } => "fadein",
            Effect::FadeOut { .. } => "fadeout",
            Effect::MirrorX => "mirror_x",
            Effect::MirrorY => "mirror_y",
            Effect::BlackWhite => "blackwhite",
            Effect::InvertColors => "invert_colors",
            Effect::Resize { .. } => "resize",
            Effect::SpeedX { .. } => "speedx",
            Effect::Rotate { .. } => "rotate",
        };
        f.write_str(name)
    }
}

/// Everything the renderer needs to build the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderRequest {
    /// Clips in playback order
    pub clips: Vec<ClipDescriptor>,
    #[serde(default)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    /// Keep the source audio (ignored when a music track is set)
    #[serde(default)]
    pub with_audio: bool,
    /// Background music replacing the source audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<PathBuf>,
    /// Burn the source timestamp into the lower right corner
    #[serde(default = "default_true")]
    pub timestamp_label: bool,
}

fn default_true() -> bool {
    true
}

impl RenderRequest {
    pub fn new(clips: Vec<ClipDescriptor>) -> Self {
        Self {
            clips,
            transition: Transition::None,
            effect: None,
            with_audio: false,
            music: None,
            timestamp_label: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_defaults_when_params_missing() {
        let params = HashMap::new();
        assert_eq!(
            Effect::from_params("fadein", &params),
            Some(Effect::FadeIn { duration: 0.5 })
        );
        assert_eq!(
            Effect::from_params("resize", &params),
            Some(Effect::Resize { height: 360 })
        );
        assert_eq!(Effect::from_params("none", &params), None);
    }

    #[test]
    fn test_effect_params_parsed() {
        let mut params = HashMap::new();
        params.insert("factor".to_string(), "2.5".to_string());
        assert_eq!(
            Effect::from_params("speedx", &params),
            Some(Effect::SpeedX { factor: 2.5 })
        );

        params.insert("angle".to_string(), "not-a-number".to_string());
        assert_eq!(
            Effect::from_params("rotate", &params),
            Some(Effect::Rotate { angle: 0.0 })
        );
    }

    #[test]
    fn test_every_name_round_trips_through_display() {
        let params = HashMap::new();
        for name in Effect::NAMES {
            let effect = Effect::from_params(name, &params).unwrap();
            assert_eq!(effect.to_string(), *name);
        }
    }

    #[test]
    fn test_clip_duration_clamped_to_source() {
        let clip = ClipDescriptor::new("a.mp4", 9.0);
        assert_eq!(clip.clamped_duration(Some(10.0)), 1.0);
        assert_eq!(clip.clamped_duration(Some(30.0)), 1.5);
        assert_eq!(clip.clamped_duration(None), 1.5);
    }

    #[test]
    fn test_transition_parsing() {
        assert_eq!("fade".parse::<Transition>().unwrap(), Transition::Fade);
        assert_eq!("none".parse::<Transition>().unwrap(), Transition::None);
        assert!("wipe".parse::<Transition>().is_err());
    }
}
