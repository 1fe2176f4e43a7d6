//! Final video assembly from selected sightings.
//!
//! Every clip becomes one FFmpeg input trimmed with `-ss`/`-t`, runs through
//! the optional effect, is fitted onto a common canvas and labelled with its
//! source timestamp. Clips are then joined with `concat` (hard cuts) or an
//! `xfade` chain (fade transition) in a single filter graph.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use facetrace_models::render::CROSSFADE_SECS;
use facetrace_models::{format_label, Effect, EncodingConfig, RenderRequest, Transition};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::probe::probe_video;

/// Audio sample format every clip is normalized to before joining.
const AUDIO_FORMAT: &str = "aformat=sample_rates=44100:channel_layouts=stereo";

/// A clip that survived validation, with its effective timing.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedClip {
    pub source: PathBuf,
    /// Start in the source, seconds
    pub start: f64,
    /// Source seconds read, already clamped to the source duration
    pub duration: f64,
    /// Whether the source has an audio stream
    pub has_audio: bool,
}

/// Where the output audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioPlan {
    Silent,
    Clips,
    /// Background track at this input index
    Music(usize),
}

/// A complete `-filter_complex` graph and its output labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub graph: String,
    pub video_label: String,
    pub audio_label: Option<String>,
    /// Length of the joined output, in seconds
    pub duration: f64,
}

/// Canvas size for the request: the encoding canvas, or the requested
/// height at the same aspect ratio for a resize effect.
pub fn canvas_size(encoding: &EncodingConfig, effect: Option<&Effect>) -> (u32, u32) {
    match effect {
        Some(Effect::Resize { height }) if *height > 0 => {
            let width = (encoding.width as f64 * *height as f64 / encoding.height.max(1) as f64)
                .round() as u32;
            (even(width), even(*height))
        }
        _ => (encoding.width, encoding.height),
    }
}

fn even(value: u32) -> u32 {
    (value.max(2) / 2) * 2
}

/// Video filter for the effect, if it changes the picture.
///
/// `clip_duration` is the played length of the clip, used to place fades.
pub fn effect_filter(effect: &Effect, clip_duration: f64) -> Option<String> {
    match *effect {
        Effect::FadeIn { duration } if duration > 0.0 => {
            Some(format!("fade=t=in:st=0:d={:.3}", duration.min(clip_duration)))
        }
        Effect::FadeOut { duration } if duration > 0.0 => {
            let d = duration.min(clip_duration);
            Some(format!("fade=t=out:st={:.3}:d={:.3}", (clip_duration - d).max(0.0), d))
        }
        Effect::MirrorX => Some("hflip".to_string()),
        Effect::MirrorY => Some("vflip".to_string()),
        Effect::BlackWhite => Some("hue=s=0".to_string()),
        Effect::InvertColors => Some("negate".to_string()),
        Effect::SpeedX { factor } if factor > 0.0 && factor != 1.0 => {
            Some(format!("setpts=PTS/{}", factor))
        }
        // Counter-clockwise degrees; FFmpeg rotates clockwise in radians
        Effect::Rotate { angle } if angle != 0.0 => {
            Some(format!("rotate=-{}*PI/180:fillcolor=black", angle))
        }
        _ => None,
    }
}

/// `atempo` chain for a speed factor; each stage must stay within [0.5, 2].
fn atempo_chain(factor: f64) -> Option<String> {
    if !(factor > 0.0) || factor == 1.0 {
        return None;
    }
    let mut stages = Vec::new();
    let mut remaining = factor;
    while remaining > 2.0 {
        stages.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    stages.push(format!("atempo={}", remaining));
    Some(stages.join(","))
}

fn timestamp_label(start: f64) -> String {
    format!(
        "drawtext=text='{}':fontsize=70:fontcolor=red:\
         box=1:boxcolor=white:boxborderw=10:x=w-tw-20:y=h-th-20",
        format_label(start)
    )
}

/// Build the filter graph joining `clips`.
///
/// Input `i` is clip `i`; `music_input` is the input index of a background
/// track, when one is used.
pub fn build_filter_graph(
    request: &RenderRequest,
    clips: &[PreparedClip],
    music_input: Option<usize>,
    encoding: &EncodingConfig,
) -> FilterGraph {
    let (width, height) = canvas_size(encoding, request.effect.as_ref());
    let speed = request.effect.map(|e| e.speed_factor()).unwrap_or(1.0);
    let played: Vec<f64> = clips.iter().map(|c| c.duration / speed).collect();

    let audio = match music_input {
        Some(index) => AudioPlan::Music(index),
        None if request.with_audio => AudioPlan::Clips,
        None => AudioPlan::Silent,
    };

    let mut graph = String::new();
    for (i, clip) in clips.iter().enumerate() {
        let mut chain = vec!["setpts=PTS-STARTPTS".to_string()];
        if let Some(filter) = request.effect.as_ref().and_then(|e| effect_filter(e, played[i])) {
            chain.push(filter);
        }
        chain.push(format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
            w = width,
            h = height
        ));
        chain.push(format!("fps={}", encoding.fps));
        chain.push("format=yuv420p".to_string());
        if request.timestamp_label {
            chain.push(timestamp_label(clip.start));
        }
        let _ = write!(graph, "[{}:v]{}[v{}];", i, chain.join(","), i);

        if audio == AudioPlan::Clips {
            if clip.has_audio {
                let mut chain = vec!["asetpts=PTS-STARTPTS".to_string()];
                if let Some(tempo) = atempo_chain(speed) {
                    chain.push(tempo);
                }
                chain.push(AUDIO_FORMAT.to_string());
                let _ = write!(graph, "[{}:a]{}[a{}];", i, chain.join(","), i);
            } else {
                let _ = write!(
                    graph,
                    "anullsrc=r=44100:cl=stereo,atrim=0:{:.3},{}[a{}];",
                    played[i], AUDIO_FORMAT, i
                );
            }
        }
    }

    let n = clips.len();
    let total: f64 = played.iter().sum();
    let fade = crossfade_length(request.transition, &played);
    let duration = total - fade * n.saturating_sub(1) as f64;

    let with_clip_audio = audio == AudioPlan::Clips;
    let (video_label, clip_audio_label) = if fade > 0.0 {
        join_with_crossfades(&mut graph, &played, fade, with_clip_audio)
    } else {
        join_with_concat(&mut graph, n, with_clip_audio)
    };

    let audio_label = match audio {
        AudioPlan::Silent => None,
        AudioPlan::Clips => clip_audio_label,
        AudioPlan::Music(index) => {
            let _ = write!(
                graph,
                "[{}:a]atrim=0:{:.3},asetpts=PTS-STARTPTS,{}[aout];",
                index, duration, AUDIO_FORMAT
            );
            Some("aout".to_string())
        }
    };

    FilterGraph {
        graph: graph.trim_end_matches(';').to_string(),
        video_label,
        audio_label,
        duration,
    }
}

/// Crossfade length, shortened so no clip is consumed entirely by fades.
fn crossfade_length(transition: Transition, played: &[f64]) -> f64 {
    if transition != Transition::Fade || played.len() < 2 {
        return 0.0;
    }
    let shortest = played.iter().cloned().fold(f64::INFINITY, f64::min);
    CROSSFADE_SECS.min(shortest / 2.0).max(0.0)
}

fn join_with_concat(graph: &mut String, n: usize, audio: bool) -> (String, Option<String>) {
    for i in 0..n {
        let _ = write!(graph, "[v{}]", i);
        if audio {
            let _ = write!(graph, "[a{}]", i);
        }
    }
    let _ = write!(graph, "concat=n={}:v=1:a={}[vout]", n, audio as u8);
    if audio {
        graph.push_str("[aout]");
    }
    graph.push(';');
    ("vout".to_string(), audio.then(|| "aout".to_string()))
}

fn join_with_crossfades(
    graph: &mut String,
    played: &[f64],
    fade: f64,
    audio: bool,
) -> (String, Option<String>) {
    let mut video = "v0".to_string();
    let mut sound = "a0".to_string();
    let mut elapsed = played[0];

    for i in 1..played.len() {
        let offset = elapsed - fade * i as f64;
        let next_video = format!("vx{}", i);
        let _ = write!(
            graph,
            "[{}][v{}]xfade=transition=fade:duration={:.3}:offset={:.3}[{}];",
            video, i, fade, offset, next_video
        );
        video = next_video;

        if audio {
            let next_sound = format!("ax{}", i);
            let _ = write!(
                graph,
                "[{}][a{}]acrossfade=d={:.3}[{}];",
                sound, i, fade, next_sound
            );
            sound = next_sound;
        }
        elapsed += played[i];
    }

    (video, audio.then_some(sound))
}

/// Full FFmpeg invocation for a render.
pub fn build_render_command(
    request: &RenderRequest,
    clips: &[PreparedClip],
    music: Option<&Path>,
    encoding: &EncodingConfig,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::with_output(output);
    for clip in clips {
        cmd = cmd
            .input(&clip.source)
            .seek(clip.start)
            .duration(clip.duration);
    }
    let mut music_input = None;
    if let Some(path) = music {
        cmd = cmd.input(path);
        music_input = Some(clips.len());
    }

    let graph = build_filter_graph(request, clips, music_input, encoding);
    cmd = cmd
        .filter_complex(graph.graph)
        .map(format!("[{}]", graph.video_label))
        .output_args(encoding.video_args());

    match graph.audio_label {
        Some(label) => cmd
            .map(format!("[{}]", label))
            .output_args(encoding.audio_args()),
        None => cmd.no_audio(),
    }
    .output_arg("-movflags")
    .output_arg("+faststart")
}

/// Assembles final videos into an output directory.
pub struct FinalRenderer {
    encoding: EncodingConfig,
    runner: FfmpegRunner,
}

impl Default for FinalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalRenderer {
    pub fn new() -> Self {
        Self {
            encoding: EncodingConfig::default(),
            runner: FfmpegRunner::new(),
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    /// Runner used for the encode, e.g. with a timeout or cancellation.
    pub fn with_runner(mut self, runner: FfmpegRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Validate and probe the requested clips.
    ///
    /// Missing or unreadable sources and empty clips are skipped with a
    /// warning.
    pub async fn prepare(&self, request: &RenderRequest) -> Vec<PreparedClip> {
        let mut prepared = Vec::with_capacity(request.clips.len());
        for clip in &request.clips {
            if !clip.source.exists() {
                warn!(source = %clip.source.display(), "Clip source missing, skipping");
                continue;
            }
            let info = match probe_video(&clip.source).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        source = %clip.source.display(),
                        "Cannot probe clip source, skipping: {}", e
                    );
                    continue;
                }
            };
            let duration = clip.clamped_duration(info.known_duration());
            if duration <= 0.0 {
                warn!(
                    source = %clip.source.display(),
                    start = clip.start,
                    "Clip starts past the end of its source, skipping"
                );
                continue;
            }
            prepared.push(PreparedClip {
                source: clip.source.clone(),
                start: clip.start,
                duration,
                has_audio: info.has_audio,
            });
        }
        prepared
    }

    /// Render `request` to `final_<uuid>.mp4` inside `output_dir`.
    pub async fn render(
        &self,
        request: &RenderRequest,
        output_dir: impl AsRef<Path>,
    ) -> MediaResult<PathBuf> {
        let started = Instant::now();
        let clips = self.prepare(request).await;
        if clips.is_empty() {
            return Err(MediaError::NothingToRender(format!(
                "none of the {} requested clips is usable",
                request.clips.len()
            )));
        }

        let music = match &request.music {
            Some(path) if path.exists() => Some(path.as_path()),
            Some(path) => {
                warn!(music = %path.display(), "Music track missing, ignoring");
                None
            }
            None => None,
        };

        let output_dir = output_dir.as_ref();
        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(format!("final_{}.mp4", Uuid::new_v4().simple()));

        info!(
            clips = clips.len(),
            skipped = request.clips.len() - clips.len(),
            transition = ?request.transition,
            effect = %request.effect.map(|e| e.to_string()).unwrap_or_else(|| "none".to_string()),
            music = music.is_some(),
            "Rendering final video"
        );

        let cmd = build_render_command(request, &clips, music, &self.encoding, &output);
        self.runner.run(&cmd).await?;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_render_duration(elapsed);
        info!(
            output = %output.display(),
            elapsed_secs = format!("{:.2}", elapsed),
            "Final video rendered"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: f64, duration: f64, has_audio: bool) -> PreparedClip {
        PreparedClip {
            source: PathBuf::from(format!("/videos/{}.mp4", start)),
            start,
            duration,
            has_audio,
        }
    }

    #[test]
    fn test_hard_cuts_use_concat_without_audio() {
        let request = RenderRequest::new(Vec::new());
        let clips = [clip(0.5, 1.5, true), clip(3.2, 1.5, true)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());

        assert!(graph.graph.contains("[v0][v1]concat=n=2:v=1:a=0[vout]"));
        assert!(!graph.graph.contains("[0:a]"));
        assert_eq!(graph.audio_label, None);
        assert!((graph.duration - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fade_builds_xfade_chain() {
        let mut request = RenderRequest::new(Vec::new());
        request.transition = Transition::Fade;
        let clips = [clip(0.0, 1.5, false), clip(2.0, 1.5, false), clip(4.0, 1.5, false)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());

        assert!(graph
            .graph
            .contains("[v0][v1]xfade=transition=fade:duration=0.500:offset=1.000[vx1]"));
        assert!(graph
            .graph
            .contains("[vx1][v2]xfade=transition=fade:duration=0.500:offset=2.000[vx2]"));
        assert_eq!(graph.video_label, "vx2");
        assert!((graph.duration - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_clip_fade_is_a_plain_concat() {
        let mut request = RenderRequest::new(Vec::new());
        request.transition = Transition::Fade;
        let clips = [clip(1.0, 1.5, false)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());
        assert!(!graph.graph.contains("xfade"));
        assert_eq!(graph.video_label, "vout");
    }

    #[test]
    fn test_clip_audio_fills_silent_sources() {
        let mut request = RenderRequest::new(Vec::new());
        request.with_audio = true;
        let clips = [clip(0.0, 1.5, true), clip(2.0, 1.0, false)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());

        assert!(graph.graph.contains("[0:a]asetpts=PTS-STARTPTS"));
        assert!(graph.graph.contains("anullsrc=r=44100:cl=stereo,atrim=0:1.000"));
        assert!(graph.graph.contains("concat=n=2:v=1:a=1[vout][aout]"));
        assert_eq!(graph.audio_label.as_deref(), Some("aout"));
    }

    #[test]
    fn test_music_replaces_clip_audio() {
        let mut request = RenderRequest::new(Vec::new());
        request.with_audio = true;
        let clips = [clip(0.0, 1.5, true)];
        let graph = build_filter_graph(&request, &clips, Some(1), &EncodingConfig::default());

        assert!(!graph.graph.contains("[0:a]"));
        assert!(graph.graph.contains("[1:a]atrim=0:1.500"));
        assert_eq!(graph.audio_label.as_deref(), Some("aout"));
    }

    #[test]
    fn test_timestamp_label_shows_clip_start() {
        let request = RenderRequest::new(Vec::new());
        let clips = [clip(3.2, 1.5, false)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());
        assert!(graph.graph.contains("drawtext=text='3.20s'"));
        assert!(graph.graph.contains("fontcolor=red"));

        let mut request = RenderRequest::new(Vec::new());
        request.timestamp_label = false;
        let clips = [clip(3.2, 1.5, false)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());
        assert!(!graph.graph.contains("drawtext"));
    }

    #[test]
    fn test_effect_filters() {
        assert_eq!(effect_filter(&Effect::MirrorX, 1.5).as_deref(), Some("hflip"));
        assert_eq!(effect_filter(&Effect::BlackWhite, 1.5).as_deref(), Some("hue=s=0"));
        assert_eq!(
            effect_filter(&Effect::FadeOut { duration: 0.5 }, 1.5).as_deref(),
            Some("fade=t=out:st=1.000:d=0.500")
        );
        assert_eq!(effect_filter(&Effect::SpeedX { factor: 1.0 }, 1.5), None);
        assert_eq!(effect_filter(&Effect::Rotate { angle: 0.0 }, 1.5), None);
        assert_eq!(effect_filter(&Effect::Resize { height: 360 }, 1.5), None);
    }

    #[test]
    fn test_speed_shortens_played_duration() {
        let mut request = RenderRequest::new(Vec::new());
        request.effect = Some(Effect::SpeedX { factor: 2.0 });
        request.with_audio = true;
        let clips = [clip(0.0, 1.5, true)];
        let graph = build_filter_graph(&request, &clips, None, &EncodingConfig::default());

        assert!(graph.graph.contains("setpts=PTS/2"));
        assert!(graph.graph.contains("atempo=2"));
        assert!((graph.duration - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_atempo_chain_stays_in_range() {
        assert_eq!(atempo_chain(1.0), None);
        assert_eq!(atempo_chain(4.0).as_deref(), Some("atempo=2.0,atempo=2"));
        assert_eq!(atempo_chain(0.25).as_deref(), Some("atempo=0.5,atempo=0.5"));
    }

    #[test]
    fn test_resize_changes_canvas() {
        let encoding = EncodingConfig::default();
        assert_eq!(canvas_size(&encoding, None), (1280, 720));
        assert_eq!(canvas_size(&encoding, Some(&Effect::Resize { height: 360 })), (640, 360));
    }

    #[test]
    fn test_render_command_layout() {
        let mut request = RenderRequest::new(Vec::new());
        request.with_audio = true;
        let clips = [clip(0.5, 1.5, true)];
        let args = build_render_command(
            &request,
            &clips,
            Some(Path::new("/music/track.mp3")),
            &EncodingConfig::default(),
            "/out/final.mp4",
        )
        .build_args();

        let first_input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(&args[first_input - 4..first_input], &["-ss", "0.500", "-t", "1.500"]);
        assert!(args.contains(&"/music/track.mp3".to_string()));
        assert!(args.contains(&"[aout]".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert_eq!(args.last().unwrap(), "/out/final.mp4");
    }

    #[test]
    fn test_missing_sources_leave_nothing_to_render() {
        let request = RenderRequest::new(vec![facetrace_models::ClipDescriptor::new(
            "/definitely/not/here.mp4",
            1.0,
        )]);
        let dir = tempfile::tempdir().unwrap();
        let err =
            tokio_test::block_on(FinalRenderer::new().render(&request, dir.path())).unwrap_err();
        assert!(matches!(err, MediaError::NothingToRender(_)));
    }
}
