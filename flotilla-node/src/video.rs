//! Video source: an `ffmpeg` child process writing raw RGB24 frames to a pipe.
//!
//! - `ffprobe` supplies geometry, frame rate and duration
//! - the primary open path asks for hardware decoding, the secondary one doesn't
//! - rewinding restarts the decoder at offset 0

use crate::pipeline::Frame;
use rand::Rng;
use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("decoder produced no frames")]
    Empty,
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
    #[error("no usable decoder (accelerated: {primary}; software: {secondary})")]
    Unavailable {
        primary: Box<VideoError>,
        secondary: Box<VideoError>,
    },
}

/// Anything that yields frames in order and can start over.
pub trait VideoSource: Send {
    /// Next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError>;
    fn rewind(&mut self) -> Result<(), VideoError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Seconds, when the container reports it.
    pub duration: Option<f64>,
}

impl VideoInfo {
    /// Uniform offset in `[0, duration)`, or 0 when the duration is unknown.
    pub fn random_start<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self.duration {
            Some(d) if d > 0.0 => rng.gen_range(0.0..d),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn probe(path: &Path) -> Result<VideoInfo, VideoError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| VideoError::Spawn { program: "ffprobe", source })?;

    if !output.status.success() {
        return Err(VideoError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

pub(crate) fn parse_probe(json: &str) -> Result<VideoInfo, VideoError> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|e| VideoError::Probe(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| VideoError::Probe("no video stream".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(VideoError::Probe("missing frame size".into())),
    };
    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .unwrap_or(30.0);
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(VideoInfo { width, height, fps, duration })
}

/// "30000/1001" or "25".
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    Accelerated,
    Software,
}

fn decoder_args(path: &Path, decode: DecodePath, start_secs: f64) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if decode == DecodePath::Accelerated {
        args.extend(["-hwaccel".into(), "auto".into()]);
    }
    if start_secs > 0.0 {
        args.extend(["-ss".into(), format!("{start_secs:.3}")]);
    }
    args.extend([
        "-re".into(),
        "-i".into(),
        path.to_string_lossy().into_owned(),
        "-an".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-".into(),
    ]);
    args
}

pub struct FfmpegSource {
    path: PathBuf,
    info: VideoInfo,
    decode: DecodePath,
    child: Child,
    stdout: ChildStdout,
    /// First frame, read at open time to prove the decoder works.
    pending: Option<Frame>,
}

impl FfmpegSource {
    pub fn open(path: &Path, info: VideoInfo, decode: DecodePath, start_secs: f64) -> Result<Self, VideoError> {
        let (child, stdout) = spawn_decoder(path, decode, start_secs)?;
        let mut source = Self {
            path: path.to_path_buf(),
            info,
            decode,
            child,
            stdout,
            pending: None,
        };
        match source.read_raw()? {
            Some(frame) => source.pending = Some(frame),
            None => return Err(VideoError::Empty),
        }
        info!(
            "decoding {} ({}x{} @ {:.2} fps, {:?}) from {:.1}s",
            source.path.display(),
            info.width,
            info.height,
            info.fps,
            decode,
            start_secs
        );
        Ok(source)
    }

    fn read_raw(&mut self) -> Result<Option<Frame>, VideoError> {
        let mut pixels = vec![0u8; Frame::byte_len(self.info.width, self.info.height)];
        match self.stdout.read_exact(&mut pixels) {
            Ok(()) => Ok(Some(Frame {
                width: self.info.width,
                height: self.info.height,
                pixels,
            })),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stop_child(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("decoder already gone: {e}");
        }
        let _ = self.child.wait();
    }
}

fn spawn_decoder(path: &Path, decode: DecodePath, start_secs: f64) -> Result<(Child, ChildStdout), VideoError> {
    let mut child = Command::new("ffmpeg")
        .args(decoder_args(path, decode, start_secs))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| VideoError::Spawn { program: "ffmpeg", source })?;
    let stdout = child.stdout.take().ok_or_else(|| VideoError::Spawn {
        program: "ffmpeg",
        source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"),
    })?;
    Ok((child, stdout))
}

impl VideoSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_raw()
    }

    fn rewind(&mut self) -> Result<(), VideoError> {
        self.stop_child();
        let (child, stdout) = spawn_decoder(&self.path, self.decode, 0.0)?;
        self.child = child;
        self.stdout = stdout;
        self.pending = None;
        debug!("decoder restarted at 0s");
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop_child();
    }
}

/// Try `primary`, then `secondary`. Both failures are kept in the error.
pub fn open_with_fallback<S, P, F>(primary: P, secondary: F) -> Result<S, VideoError>
where
    P: FnOnce() -> Result<S, VideoError>,
    F: FnOnce() -> Result<S, VideoError>,
{
    match primary() {
        Ok(source) => Ok(source),
        Err(primary) => {
            warn!("accelerated decoding failed ({primary}), retrying in software");
            secondary().map_err(|secondary| VideoError::Unavailable {
                primary: Box::new(primary),
                secondary: Box::new(secondary),
            })
        }
    }
}
