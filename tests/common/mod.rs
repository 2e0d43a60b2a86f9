//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which lays out scratch video/HLS directories,
//! builds an [`AppContext`] around a shell-script transcoder, and can start
//! Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hlsduo::config::Config;
use hlsduo::server::{create_router, AppContext};
use hlsduo_av::{TranscodeJob, Transcoder};
use tokio::process::Command;

/// Writes a growing playlist and one tiny segment every 20ms until killed.
const FAKE_MUXER: &str = r#"
out="$1"
i=0
while true; do
  printf 'ts' > "$out/segment_$i.ts"
  {
    echo '#EXTM3U'
    echo '#EXT-X-VERSION:3'
    echo '#EXT-X-TARGETDURATION:2'
    echo '#EXT-X-MEDIA-SEQUENCE:0'
    j=0
    while [ $j -le $i ]; do
      echo '#EXTINF:2.000000,'
      echo "segment_$j.ts"
      j=$((j+1))
    done
  } > "$out/playlist.tmp"
  mv "$out/playlist.tmp" "$out/playlist.m3u8"
  i=$((i+1))
  sleep 0.02
done
"#;

#[derive(Debug)]
pub struct ScriptTranscoder;

impl Transcoder for ScriptTranscoder {
    fn name(&self) -> &str {
        "sh"
    }

    fn command(&self, job: &TranscodeJob) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(FAKE_MUXER)
            .arg("fake-muxer")
            .arg(&job.output_dir)
            .current_dir(&job.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Test harness wrapping an [`AppContext`] rooted in a temp directory.
pub struct TestHarness {
    pub ctx: AppContext,
    dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.storage.videos_dir = dir.path().join("videos");
        config.storage.hls_root = dir.path().join("hls");
        config.stream.tail_interval_ms = 20;
        std::fs::create_dir_all(&config.storage.videos_dir).unwrap();
        std::fs::create_dir_all(&config.storage.hls_root).unwrap();

        let ctx = AppContext::new(config, Arc::new(ScriptTranscoder));
        Self { ctx, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = create_router(harness.ctx.clone(), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    pub fn hls_root(&self) -> PathBuf {
        self.dir.path().join("hls")
    }

    /// Put a fake video into the library and return its path.
    pub fn add_video(&self, name: &str, len: usize) -> PathBuf {
        let path = self.videos_dir().join(name);
        std::fs::write(&path, vec![0u8; len]).expect("failed to write video");
        path
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        // The spawned server keeps the coordinator alive, so kill-on-drop
        // never fires for streams a test left running.
        for name in hlsduo_common::StreamName::ALL {
            if let Some(pid) = self.ctx.coordinator.pipeline(name).pid() {
                let _ = std::process::Command::new("kill")
                    .arg(pid.to_string())
                    .status();
            }
        }
    }
}

/// Poll `cond` every 20ms for up to 10s.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
