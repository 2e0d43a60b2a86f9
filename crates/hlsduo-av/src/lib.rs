//! hlsduo-av: the external transcoder seam.
//!
//! - **Tool detection** ([`tools`]) -- locate ffmpeg via config or `PATH`
//!   and report its version.
//! - **Transcoders** ([`Transcoder`]) -- turn an input file and an output
//!   directory into a ready-to-spawn command. [`FfmpegTranscoder`] carries
//!   the fixed LL-HLS argument set.

pub mod tools;
pub mod transcoder;

pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo};
pub use transcoder::{
    EncodeSettings, FfmpegTranscoder, TranscodeJob, Transcoder, HLS_LIST_SIZE,
    HLS_SEGMENT_SECONDS, PLAYLIST_FILE, SEGMENT_PREFIX, SEGMENT_SUFFIX,
};
