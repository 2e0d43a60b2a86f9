//! Pipeline lifecycle against a shell-script transcoder.
//!
//! The script mimics ffmpeg's HLS muxer closely enough for the manager: it
//! keeps writing `segment_<n>.ts` files and an open-ended `playlist.m3u8`
//! until it is killed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hlsduo_av::{TranscodeJob, Transcoder};
use hlsduo_common::{Error, StreamName};
use hlsduo_stream::{PipelineState, StreamCoordinator, StreamSettings};
use tokio::process::Command;

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
struct ScriptTranscoder {
    script: &'static str,
}

impl Transcoder for ScriptTranscoder {
    fn name(&self) -> &str {
        "sh"
    }

    fn command(&self, job: &TranscodeJob) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(self.script)
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

#[derive(Debug)]
struct MissingProgram;

impl Transcoder for MissingProgram {
    fn name(&self) -> &str {
        "nonexistent_transcoder_12345"
    }

    fn command(&self, _job: &TranscodeJob) -> Command {
        Command::new("nonexistent_transcoder_12345")
    }
}

struct Fixture {
    _root: tempfile::TempDir,
    hls_root: PathBuf,
    video: PathBuf,
    coord: StreamCoordinator,
}

fn fixture(transcoder: Arc<dyn Transcoder>) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let video = root.path().join("clip.mp4");
    std::fs::write(&video, vec![0u8; 10 * 1024 * 1024]).unwrap();

    let hls_root = root.path().join("hls");
    let mut settings = StreamSettings::new(&hls_root);
    settings.working_dir = root.path().to_path_buf();
    settings.tail_interval = Duration::from_millis(20);

    Fixture {
        coord: StreamCoordinator::new(settings, transcoder),
        hls_root,
        video,
        _root: root,
    }
}

fn muxer() -> Arc<dyn Transcoder> {
    Arc::new(ScriptTranscoder { script: FAKE_MUXER })
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
        && !std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| stat.contains(") Z "))
            .unwrap_or(true)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn play_push_scenario() {
    let f = fixture(muxer());

    let started = f.coord.start_stream("play", &f.video).await.unwrap();
    assert_eq!(started.name, StreamName::Play);
    assert_eq!(started.playlist_url, "/hls/play/playlist.m3u8");
    assert!(f.coord.is_active(StreamName::Play));
    assert_eq!(
        f.coord.pipeline(StreamName::Play).state(),
        PipelineState::Active
    );

    let playlist = f.hls_root.join("play").join("playlist.m3u8");
    wait_for("play playlist", || playlist.exists()).await;

    // The twin starts independently while play is running.
    f.coord.start_stream("push", &f.video).await.unwrap();
    assert!(f.coord.is_active(StreamName::Push));

    let first_pid = f.coord.pipeline(StreamName::Play).pid().unwrap();
    let err = f.coord.start_stream("play", &f.video).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyActive(StreamName::Play)));
    assert_eq!(f.coord.pipeline(StreamName::Play).pid(), Some(first_pid));
    assert!(f.coord.is_active(StreamName::Play));

    f.coord.stop_stream("play").await.unwrap();
    assert!(!f.coord.is_active(StreamName::Play));
    assert!(f.coord.pipeline(StreamName::Play).pid().is_none());
    assert!(!pid_alive(first_pid));

    f.coord.stop_stream("play").await.unwrap();
    assert!(!f.coord.is_active(StreamName::Play));
    assert!(f.coord.is_active(StreamName::Push));

    let source = f.coord.source().unwrap();
    assert_eq!(source.len(), 10 * 1024 * 1024);

    f.coord.close().await.unwrap();
    assert!(!f.coord.is_active(StreamName::Push));
    assert!(source.is_closed());
    f.coord.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn segment_index_follows_output() {
    let f = fixture(muxer());
    f.coord.start_stream("push", &f.video).await.unwrap();

    let push = f.coord.pipeline(StreamName::Push);
    wait_for("seven indexed segments", || {
        push.with_index(|index| index.next_index() >= 7)
    })
    .await;

    push.with_index(|index| {
        assert_eq!(index.len(), 6);
        assert_eq!(index.media_sequence(), index.next_index() - 6);
        let first = index.segments().next().unwrap();
        assert_eq!(first.payload.file_name, format!("segment_{}.ts", first.index));
    });

    let playlist = f.coord.playlist("push").unwrap();
    assert!(playlist.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n"));
    assert!(!playlist.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
    assert!(!playlist.contains("#EXT-X-ENDLIST"));
    assert!(playlist.contains("#EXTINF:2.000,\n/hls/push/segment_"));

    f.coord.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_purges_stale_output_and_resets_index() {
    let f = fixture(muxer());
    let play = f.coord.pipeline(StreamName::Play);

    f.coord.start_stream("play", &f.video).await.unwrap();
    wait_for("indexed segments", || {
        play.with_index(|index| index.next_index() >= 3)
    })
    .await;
    f.coord.stop_stream("play").await.unwrap();

    let stale = f.hls_root.join("play").join("segment_999.ts");
    std::fs::write(&stale, b"stale").unwrap();

    f.coord.start_stream("play", &f.video).await.unwrap();
    assert!(!stale.exists());
    wait_for("fresh window", || {
        play.with_index(|index| index.segments().next().map(|s| s.index) == Some(0))
    })
    .await;

    f.coord.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_start_does_not_wedge_pipeline() {
    let f = fixture(muxer());
    let play = f.coord.pipeline(StreamName::Play);

    let out = f.hls_root.join("play");
    std::fs::create_dir_all(&out).unwrap();
    for n in 0..2000 {
        std::fs::write(out.join(format!("segment_{n}.ts")), b"stale").unwrap();
    }

    // The caller gives up while the start may still be purging.
    let start = f.coord.start_stream("play", &f.video);
    let _ = tokio::time::timeout(Duration::from_millis(1), start).await;
    assert_ne!(play.state(), PipelineState::Starting);

    f.coord.stop_stream("play").await.unwrap();
    assert_eq!(play.state(), PipelineState::Idle);

    f.coord.start_stream("play", &f.video).await.unwrap();
    assert_eq!(play.state(), PipelineState::Active);
    f.coord.close().await.unwrap();
    assert_eq!(play.state(), PipelineState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn process_exit_returns_pipeline_to_idle() {
    let f = fixture(Arc::new(ScriptTranscoder {
        script: "echo 'Conversion failed!' >&2; exit 3",
    }));

    f.coord.start_stream("play", &f.video).await.unwrap();
    let play = f.coord.pipeline(StreamName::Play);
    wait_for("exit to be observed", || !play.is_active()).await;

    assert_eq!(play.state(), PipelineState::Idle);
    let fault = play.last_fault().expect("fault recorded");
    assert_eq!(fault.exit_code, Some(3));
    assert!(fault.message.contains("Conversion failed!"), "{}", fault.message);

    let status = f.coord.status("play").unwrap();
    assert!(!status.active);
    assert!(status.last_fault.is_some());

    // No auto-restart, but an explicit start is allowed again.
    f.coord.stop_stream("play").await.unwrap();
    f.coord.start_stream("play", &f.video).await.unwrap();
    f.coord.close().await.unwrap();
}

#[tokio::test]
async fn launch_failure_leaves_pipeline_idle() {
    let f = fixture(Arc::new(MissingProgram));

    let err = f.coord.start_stream("push", &f.video).await.unwrap_err();
    assert!(
        matches!(err, Error::ProcessLaunch { ref tool, .. } if tool == "nonexistent_transcoder_12345")
    );
    assert_eq!(
        f.coord.pipeline(StreamName::Push).state(),
        PipelineState::Idle
    );
    assert!(f.coord.pipeline(StreamName::Push).last_fault().is_none());
    f.coord.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_stops_whatever_is_running() {
    for active in 0..=2usize {
        let f = fixture(muxer());
        for name in StreamName::ALL.iter().take(active) {
            f.coord.start_stream(name.as_str(), &f.video).await.unwrap();
        }
        let pids: Vec<u32> = StreamName::ALL
            .iter()
            .filter_map(|&n| f.coord.pipeline(n).pid())
            .collect();
        assert_eq!(pids.len(), active);

        let source = f.coord.source();
        f.coord.close().await.unwrap();

        for name in StreamName::ALL {
            assert_eq!(f.coord.pipeline(name).state(), PipelineState::Idle);
        }
        for pid in pids {
            assert!(!pid_alive(pid), "pid {pid} still running");
        }
        if let Some(source) = source {
            assert!(source.is_closed());
        }
        assert!(f.coord.source().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_admit_exactly_one() {
    let f = Arc::new(fixture(muxer()));

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.coord.start_stream("play", &f.video).await })
        })
        .collect();

    let mut ok = 0;
    let mut already_active = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::AlreadyActive(StreamName::Play)) => already_active += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, already_active), (1, 3));

    f.coord.close().await.unwrap();
}
