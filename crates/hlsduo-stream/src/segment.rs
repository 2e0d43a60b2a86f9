//! Rolling window of segment descriptors and its M3U8 rendering.
//!
//! The index mirrors what the transcoder keeps on disk: the newest
//! [`WINDOW_SIZE`] segments, each nominally [`TARGET_DURATION`] long. The
//! next-index counter is the single source of truth for the media sequence;
//! indices are never reused, even after eviction.

use std::collections::VecDeque;
use std::time::Duration;

use hlsduo_av::{HLS_LIST_SIZE, HLS_SEGMENT_SECONDS};
use serde::Serialize;

/// Nominal duration of every segment.
pub const TARGET_DURATION: Duration = Duration::from_secs(HLS_SEGMENT_SECONDS as u64);

/// Maximum number of segments retained.
pub const WINDOW_SIZE: usize = HLS_LIST_SIZE;

/// Where a segment's media lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentPayload {
    /// File name inside the pipeline's output directory.
    pub file_name: String,
    /// Size of the file when it was indexed.
    pub size: u64,
}

/// One entry of the playlist window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u64,
    /// Offset of this segment on the stream's logical timeline.
    pub start_time: Duration,
    pub duration: Duration,
    pub payload: SegmentPayload,
}

/// Bounded, ordered window of the newest segments for one pipeline.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    segments: VecDeque<Segment>,
    next_index: u64,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self {
            segments: VecDeque::with_capacity(WINDOW_SIZE + 1),
            next_index: 0,
        }
    }

    /// Clear the window and restart numbering at zero.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.next_index = 0;
    }

    /// Record a new segment, evicting the oldest once the window is full.
    pub fn append(&mut self, payload: SegmentPayload, start_time: Duration) -> Segment {
        let segment = Segment {
            index: self.next_index,
            start_time,
            duration: TARGET_DURATION,
            payload,
        };
        self.next_index += 1;

        self.segments.push_back(segment.clone());
        while self.segments.len() > WINDOW_SIZE {
            self.segments.pop_front();
        }

        segment
    }

    /// Look up a segment that is still in the window.
    pub fn get(&self, index: u64) -> Option<&Segment> {
        let oldest = self.media_sequence();
        if index < oldest || index >= self.next_index {
            return None;
        }
        self.segments.get((index - oldest) as usize)
    }

    /// Index of the oldest retained segment.
    pub fn media_sequence(&self) -> u64 {
        self.next_index - self.segments.len() as u64
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Retained segments, oldest first.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Render the live media playlist.
    ///
    /// The playlist never carries `#EXT-X-ENDLIST`, so clients keep polling.
    pub fn render_playlist(&self) -> String {
        self.render_playlist_at("")
    }

    /// Render the playlist with `uri_prefix` prepended to every segment URI.
    pub fn render_playlist_at(&self, uri_prefix: &str) -> String {
        let mut playlist = String::with_capacity(96 + self.segments.len() * 40);
        playlist.push_str("#EXTM3U\n");
        playlist.push_str("#EXT-X-VERSION:3\n");
        playlist.push_str(&format!(
            "#EXT-X-TARGETDURATION:{}\n",
            TARGET_DURATION.as_secs()
        ));
        playlist.push_str(&format!(
            "#EXT-X-MEDIA-SEQUENCE:{}\n",
            self.media_sequence()
        ));

        for segment in &self.segments {
            playlist.push_str(&format!(
                "#EXTINF:{:.3},\n",
                segment.duration.as_secs_f64()
            ));
            playlist.push_str(uri_prefix);
            playlist.push_str(&segment.payload.file_name);
            playlist.push('\n');
        }

        playlist
    }
}
