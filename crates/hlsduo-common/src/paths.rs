//! Path utilities for the video library.
//!
//! Only a handful of container formats are offered for streaming; everything
//! else in the storage directory is ignored by the listing.

use std::path::Path;

/// Video file extensions offered by the library listing.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];

/// Check if a path has a streamable video extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use hlsduo_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("movie.mkv")));
/// assert!(is_video_file(Path::new("/path/to/video.MP4")));
/// assert!(!is_video_file(Path::new("segment_3.ts")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Get the list of streamable video extensions.
#[must_use]
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}

/// Reduce a client-supplied file name to its final component.
///
/// Returns `None` for names that would escape the storage directory or
/// that are empty once stripped.
///
/// ```
/// use hlsduo_common::paths::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("clip.mp4").as_deref(), Some("clip.mp4"));
/// assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
/// assert_eq!(sanitize_file_name(".."), None);
/// ```
pub fn sanitize_file_name(name: &str) -> Option<String> {
    // Clients on Windows send backslash-separated paths.
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
