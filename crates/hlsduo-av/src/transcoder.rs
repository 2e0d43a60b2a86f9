//! Launch parameters for the external LL-HLS transcoder.
//!
//! A [`Transcoder`] knows how to turn a [`TranscodeJob`] into a
//! [`tokio::process::Command`]; spawning, killing, and reaping the process is
//! left to the caller. The production implementation is [`FfmpegTranscoder`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Nominal segment length written by the transcoder, in seconds.
pub const HLS_SEGMENT_SECONDS: u32 = 2;

/// Number of segments the transcoder keeps in its rolling playlist.
pub const HLS_LIST_SIZE: usize = 6;

/// Playlist file name inside a pipeline's output directory.
pub const PLAYLIST_FILE: &str = "playlist.m3u8";

/// Segment files are named `segment_<n>.ts`.
pub const SEGMENT_PREFIX: &str = "segment_";
pub const SEGMENT_SUFFIX: &str = ".ts";

/// One transcoding run: where to read from and where to write.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Absolute path of the source video.
    pub input: PathBuf,
    /// Directory receiving the playlist and segment files.
    pub output_dir: PathBuf,
    /// Working directory of the spawned process.
    pub working_dir: PathBuf,
}

impl TranscodeJob {
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(PLAYLIST_FILE)
    }

    pub fn segment_pattern(&self) -> PathBuf {
        self.output_dir
            .join(format!("{SEGMENT_PREFIX}%d{SEGMENT_SUFFIX}"))
    }
}

/// Builds the command for an external transcoding process.
///
/// Implementations must produce a process that writes [`PLAYLIST_FILE`] and
/// `segment_<n>.ts` files into the job's output directory until killed.
pub trait Transcoder: Send + Sync + fmt::Debug {
    /// Program name used in logs and launch errors.
    fn name(&self) -> &str;

    /// Build a command ready to spawn.
    fn command(&self, job: &TranscodeJob) -> Command;
}

/// Encoder knobs exposed through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    /// x264 preset.
    pub preset: String,
    /// Target video bitrate (ffmpeg syntax, e.g. `2000k`).
    pub video_bitrate: String,
    /// Target audio bitrate.
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            preset: "ultrafast".into(),
            video_bitrate: "2000k".into(),
            audio_bitrate: "128k".into(),
        }
    }
}

/// ffmpeg producing an open-ended MPEG-TS HLS stream.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    settings: EncodeSettings,
}

impl FfmpegTranscoder {
    pub fn new(program: PathBuf, settings: EncodeSettings) -> Self {
        Self { program, settings }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The full ffmpeg argument list for `job`.
    ///
    /// Real-time read pacing, zero-latency x264 + AAC, 2 s segments, a 6
    /// entry playlist, superseded segments deleted, and no `#EXT-X-ENDLIST`.
    pub fn args(&self, job: &TranscodeJob) -> Vec<String> {
        let s = &self.settings;
        let mut args: Vec<String> = Vec::with_capacity(32);
        args.extend(["-re".into(), "-i".into()]);
        args.push(job.input.to_string_lossy().into_owned());
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                s.preset.as_str(),
                "-tune",
                "zerolatency",
                "-c:a",
                "aac",
                "-b:v",
                s.video_bitrate.as_str(),
                "-b:a",
                s.audio_bitrate.as_str(),
                "-f",
                "hls",
            ]
            .map(String::from),
        );
        args.extend(["-hls_time".into(), HLS_SEGMENT_SECONDS.to_string()]);
        args.extend(["-hls_list_size".into(), HLS_LIST_SIZE.to_string()]);
        args.extend(
            [
                "-hls_flags",
                "delete_segments+omit_endlist",
                "-hls_segment_type",
                "mpegts",
                "-hls_segment_filename",
            ]
            .map(String::from),
        );
        args.push(job.segment_pattern().to_string_lossy().into_owned());
        args.push(job.playlist_path().to_string_lossy().into_owned());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ffmpeg")
    }

    fn command(&self, job: &TranscodeJob) -> Command {
        let args = self.args(job);
        tracing::info!("Starting FFmpeg: {} {}", self.program.display(), args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
