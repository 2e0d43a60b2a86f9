use hlsduo_av::EncodeSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Front-end build served for any path no route claims
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Uploaded and listed source videos
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,

    /// Parent of the per-stream HLS output directories
    #[serde(default = "default_hls_root")]
    pub hls_root: PathBuf,
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("./videos")
}
fn default_hls_root() -> PathBuf {
    PathBuf::from("./hls")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            videos_dir: default_videos_dir(),
            hls_root: default_hls_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// How often the segment index re-reads the transcoder playlist
    #[serde(default = "default_tail_interval_ms")]
    pub tail_interval_ms: u64,
}

fn default_preset() -> String {
    EncodeSettings::default().preset
}
fn default_video_bitrate() -> String {
    EncodeSettings::default().video_bitrate
}
fn default_audio_bitrate() -> String {
    EncodeSettings::default().audio_bitrate
}
fn default_tail_interval_ms() -> u64 {
    500
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            tail_interval_ms: default_tail_interval_ms(),
        }
    }
}

impl StreamConfig {
    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            preset: self.preset.clone(),
            video_bitrate: self.video_bitrate.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
        }
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_millis(self.tail_interval_ms)
    }
}
