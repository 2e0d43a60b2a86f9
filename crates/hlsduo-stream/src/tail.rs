//! Keeps a [`SegmentIndex`] in step with the transcoder's output directory.
//!
//! The transcoder only lists a segment in its own playlist once the file is
//! complete, so the tailer reads that playlist rather than the raw directory
//! listing and indexes every segment number it has not seen yet.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hlsduo_av::{PLAYLIST_FILE, SEGMENT_PREFIX, SEGMENT_SUFFIX};
use parking_lot::RwLock;

use crate::segment::{SegmentIndex, SegmentPayload, TARGET_DURATION};

/// Extract `n` from `segment_<n>.ts`.
pub fn parse_segment_number(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Segment file names listed in a media playlist, in playlist order.
pub fn playlist_segments(playlist: &str) -> Vec<&str> {
    playlist
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.rsplit('/').next().unwrap_or(line))
        .collect()
}

/// Polls one output directory and appends new segments to an index.
pub struct SegmentTailer {
    dir: PathBuf,
    index: Arc<RwLock<SegmentIndex>>,
    last_seen: Option<u64>,
}

impl SegmentTailer {
    pub fn new(dir: impl Into<PathBuf>, index: Arc<RwLock<SegmentIndex>>) -> Self {
        Self {
            dir: dir.into(),
            index,
            last_seen: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Index any completed segments that appeared since the last poll.
    ///
    /// Returns how many segments were appended. A missing playlist is not an
    /// error: the transcoder has simply not written one yet.
    pub async fn poll(&mut self) -> std::io::Result<usize> {
        let playlist = match tokio::fs::read_to_string(self.dir.join(PLAYLIST_FILE)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut fresh: Vec<(u64, String)> = playlist_segments(&playlist)
            .into_iter()
            .filter_map(|name| parse_segment_number(name).map(|n| (n, name.to_string())))
            .filter(|(n, _)| self.last_seen.map_or(true, |seen| *n > seen))
            .collect();
        fresh.sort_by_key(|(n, _)| *n);
        fresh.dedup_by_key(|(n, _)| *n);

        let mut payloads = Vec::with_capacity(fresh.len());
        for (n, file_name) in fresh {
            // Superseded segments may already be gone.
            let size = tokio::fs::metadata(self.dir.join(&file_name))
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            payloads.push((n, SegmentPayload { file_name, size }));
        }

        let appended = payloads.len();
        if let Some((n, _)) = payloads.last() {
            self.last_seen = Some(*n);
        }

        let mut index = self.index.write();
        for (n, payload) in payloads {
            let segment = index.append(payload, TARGET_DURATION * n as u32);
            tracing::trace!(
                index = segment.index,
                file = %segment.payload.file_name,
                "Indexed segment"
            );
        }

        Ok(appended)
    }
}
