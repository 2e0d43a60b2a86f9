//! Routes start/stop requests to the `play` and `push` pipelines and owns
//! the source buffer they share.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hlsduo_av::{Transcoder, PLAYLIST_FILE};
use hlsduo_common::{Error, Result, StreamName};
use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::SourceBuffer;
use crate::pipeline::{absolute_path, Pipeline, PipelineState, PipelineStatus};

/// Default interval between output directory polls.
const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(500);

/// Filesystem layout for the pipelines.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Each pipeline writes to `<hls_root>/<name>`.
    pub hls_root: PathBuf,
    /// Working directory of transcoder processes.
    pub working_dir: PathBuf,
    /// How often each pipeline re-reads its output playlist.
    pub tail_interval: Duration,
}

impl StreamSettings {
    pub fn new(hls_root: impl Into<PathBuf>) -> Self {
        let hls_root = hls_root.into();
        let working_dir = std::env::current_dir().unwrap_or_else(|_| hls_root.clone());
        Self {
            hls_root,
            working_dir,
            tail_interval: DEFAULT_TAIL_INTERVAL,
        }
    }
}

/// Returned by a successful [`StreamCoordinator::start_stream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStarted {
    pub name: StreamName,
    /// Public URL of the transcoder's playlist.
    pub playlist_url: String,
}

/// Owner of the shared source buffer and both pipelines.
pub struct StreamCoordinator {
    play: Pipeline,
    push: Pipeline,
    source: Mutex<Option<Arc<SourceBuffer>>>,
}

impl StreamCoordinator {
    pub fn new(settings: StreamSettings, transcoder: Arc<dyn Transcoder>) -> Self {
        let pipeline = |name: StreamName| {
            Pipeline::new(
                name,
                settings.hls_root.join(name.as_str()),
                settings.working_dir.clone(),
                Arc::clone(&transcoder),
                settings.tail_interval,
            )
        };

        Self {
            play: pipeline(StreamName::Play),
            push: pipeline(StreamName::Push),
            source: Mutex::new(None),
        }
    }

    pub fn pipeline(&self, name: StreamName) -> &Pipeline {
        match name {
            StreamName::Play => &self.play,
            StreamName::Push => &self.push,
        }
    }

    /// Start the pipeline called `name` on `source`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownStream`] for names other than `play` and `push`;
    ///   neither pipeline is touched.
    /// - Anything [`SourceBuffer::open`] or [`Pipeline::start`] reports,
    ///   including [`Error::AlreadyActive`] unchanged.
    pub async fn start_stream(&self, name: &str, source: &Path) -> Result<StreamStarted> {
        let name: StreamName = name.parse()?;
        tracing::info!(stream = %name, path = %source.display(), "Starting stream");

        let source = absolute_path(source)?;
        self.ensure_source(&source).await?;
        self.pipeline(name).start(&source).await?;

        Ok(StreamStarted {
            name,
            playlist_url: format!("{}{PLAYLIST_FILE}", public_dir(name)),
        })
    }

    /// Stop the pipeline called `name`. Stopping an idle pipeline succeeds.
    pub async fn stop_stream(&self, name: &str) -> Result<()> {
        let name: StreamName = name.parse()?;
        self.pipeline(name).stop().await
    }

    /// Stop both pipelines, then release the source buffer.
    ///
    /// Both stops are always attempted; the first error is returned. Closing
    /// twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for name in StreamName::ALL {
            if let Err(e) = self.pipeline(name).stop().await {
                tracing::error!(stream = %name, "Failed to stop stream during close: {e}");
                first_err.get_or_insert(e);
            }
        }

        let source = self.source.lock().take();
        if let Some(buffer) = source {
            match buffer.close() {
                Ok(()) => tracing::info!(path = %buffer.path().display(), "Source buffer released"),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_active(&self, name: StreamName) -> bool {
        self.pipeline(name).is_active()
    }

    pub fn status(&self, name: &str) -> Result<PipelineStatus> {
        let name: StreamName = name.parse()?;
        Ok(self.pipeline(name).status())
    }

    pub fn statuses(&self) -> Vec<PipelineStatus> {
        StreamName::ALL
            .iter()
            .map(|&name| self.pipeline(name).status())
            .collect()
    }

    /// Playlist rendered from the segment index of `name`.
    ///
    /// Segment URIs are absolute paths under `/hls/<name>/`, so the playlist
    /// plays from whatever URL it is served at.
    pub fn playlist(&self, name: &str) -> Result<String> {
        let name: StreamName = name.parse()?;
        let prefix = public_dir(name);
        Ok(self
            .pipeline(name)
            .with_index(|index| index.render_playlist_at(&prefix)))
    }

    /// The currently open source buffer, if any.
    pub fn source(&self) -> Option<Arc<SourceBuffer>> {
        self.source.lock().clone()
    }

    /// Map `path` unless it is already the open source.
    ///
    /// A different file replaces the current mapping only while both
    /// pipelines are idle; otherwise the running stream keeps its buffer.
    async fn ensure_source(&self, path: &Path) -> Result<Arc<SourceBuffer>> {
        if let Some(current) = self.current_source_for(path) {
            return Ok(current);
        }

        let owned = path.to_path_buf();
        let buffer = tokio::task::spawn_blocking(move || SourceBuffer::open(owned))
            .await
            .map_err(|e| Error::internal(format!("source open task failed: {e}")))??;
        let buffer = Arc::new(buffer);

        let previous = {
            let mut slot = self.source.lock();
            // Another start may have installed a buffer while this one mapped.
            if let Some(current) = slot.as_ref() {
                if current.path() == path || self.any_busy() {
                    let current = Arc::clone(current);
                    drop(slot);
                    let _ = buffer.close();
                    return Ok(current);
                }
            }
            slot.replace(Arc::clone(&buffer))
        };

        if let Some(previous) = previous {
            previous.close()?;
        }
        tracing::info!(path = %path.display(), bytes = buffer.len(), "Source buffer opened");
        Ok(buffer)
    }

    /// The open buffer if it should serve a start on `path`.
    fn current_source_for(&self, path: &Path) -> Option<Arc<SourceBuffer>> {
        let slot = self.source.lock();
        let current = slot.as_ref()?;
        if current.path() == path {
            return Some(Arc::clone(current));
        }
        if self.any_busy() {
            tracing::warn!(
                current = %current.path().display(),
                requested = %path.display(),
                "Source buffer in use by a stream; not remapping"
            );
            return Some(Arc::clone(current));
        }
        None
    }

    /// True unless both pipelines are `Idle`; a start in progress counts.
    fn any_busy(&self) -> bool {
        StreamName::ALL
            .iter()
            .any(|&name| self.pipeline(name).state() != PipelineState::Idle)
    }
}

/// Public URL directory of a stream's HLS output.
fn public_dir(name: StreamName) -> String {
    format!("/hls/{name}/")
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        // Child processes are spawned with kill-on-drop; only the mapping
        // needs an explicit release here.
        if let Some(buffer) = self.source.get_mut().take() {
            let _ = buffer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlsduo_av::TranscodeJob;
    use tokio::process::Command;

    /// Never actually launched by these tests.
    #[derive(Debug)]
    struct Unused;

    impl Transcoder for Unused {
        fn name(&self) -> &str {
            "unused"
        }

        fn command(&self, _job: &TranscodeJob) -> Command {
            Command::new("false")
        }
    }

    fn coordinator(root: &Path) -> StreamCoordinator {
        StreamCoordinator::new(StreamSettings::new(root.join("hls")), Arc::new(Unused))
    }

    #[tokio::test]
    async fn unknown_stream_has_no_side_effects() {
        let root = tempfile::tempdir().unwrap();
        let video = root.path().join("a.mp4");
        std::fs::write(&video, [1u8; 32]).unwrap();
        let coord = coordinator(root.path());

        let err = coord.start_stream("record", &video).await.unwrap_err();
        assert!(matches!(err, Error::UnknownStream(ref s) if s == "record"));
        assert!(coord.source().is_none());
        assert!(!root.path().join("hls").exists());
        for status in coord.statuses() {
            assert!(!status.active);
        }

        assert!(matches!(
            coord.stop_stream("record").await,
            Err(Error::UnknownStream(_))
        ));
    }

    #[tokio::test]
    async fn missing_source_is_not_found_and_leaves_pipeline_idle() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(root.path());

        let err = coord
            .start_stream("play", &root.path().join("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!coord.is_active(StreamName::Play));
        assert!(coord.source().is_none());
    }

    #[tokio::test]
    async fn close_without_streams_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(root.path());
        coord.close().await.unwrap();
        coord.close().await.unwrap();
    }

    #[tokio::test]
    async fn source_is_remapped_only_while_idle() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("first.mp4");
        let second = root.path().join("second.mp4");
        std::fs::write(&first, [1u8; 10]).unwrap();
        std::fs::write(&second, [2u8; 20]).unwrap();
        let coord = coordinator(root.path());

        let a = coord.ensure_source(&first).await.unwrap();
        let again = coord.ensure_source(&first).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));

        let b = coord.ensure_source(&second).await.unwrap();
        assert_eq!(b.len(), 20);
        assert!(a.is_closed());
        assert!(!b.is_closed());

        coord.close().await.unwrap();
        assert!(b.is_closed());
        assert!(coord.source().is_none());
    }

    #[tokio::test]
    async fn starting_pipeline_keeps_source_mapped() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("first.mp4");
        let second = root.path().join("second.mp4");
        std::fs::write(&first, [1u8; 10]).unwrap();
        std::fs::write(&second, [2u8; 20]).unwrap();
        let coord = coordinator(root.path());

        let a = coord.ensure_source(&first).await.unwrap();
        coord.pipeline(StreamName::Play).set_state(PipelineState::Starting);

        let b = coord.ensure_source(&second).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_closed());

        coord.pipeline(StreamName::Play).set_state(PipelineState::Idle);
        coord.close().await.unwrap();
        assert!(a.is_closed());
    }

    #[test]
    fn playlist_points_at_served_segments() {
        let coord = coordinator(Path::new("/srv"));
        let playlist = coord.playlist("push").unwrap();
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert_eq!(public_dir(StreamName::Push), "/hls/push/");
        assert!(matches!(
            coord.playlist("record"),
            Err(Error::UnknownStream(_))
        ));
    }

    #[test]
    fn pipelines_write_to_separate_directories() {
        let coord = coordinator(Path::new("/srv"));
        assert_eq!(
            coord.pipeline(StreamName::Play).output_dir(),
            Path::new("/srv/hls/play")
        );
        assert_eq!(
            coord.pipeline(StreamName::Push).output_dir(),
            Path::new("/srv/hls/push")
        );
    }
}
