use std::time::{Duration, Instant};

use anyhow::Result;

use detection_sync::{
    open_source, ChildDetector, DetectorCommand, FilesystemArtifactStore, Frame, HeadlessDisplay,
    LineOutcome, LoopSettings, Rendered, RestartPolicy, ScriptStep, ScriptedDetector,
    ScriptedSource, SourceSettings, SupervisedDetector, SyncLoop,
};

const HEAD_LINE: &str = r#"[{"label":"head","bbox":{"x":0.1,"y":0.2,"width":0.5,"height":0.6}}]"#;

fn settings(poll_ms: u64) -> LoopSettings {
    LoopSettings {
        poll_timeout: Duration::from_millis(poll_ms),
        ..LoopSettings::default()
    }
}

fn fake_detector(args: &[&str]) -> ChildDetector {
    let command = DetectorCommand::new(env!("CARGO_BIN_EXE_fake_detector"))
        .with_args(args.iter().copied());
    ChildDetector::new(command)
}

#[test]
fn persisted_pair_holds_raw_paired_frame() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("data");
    let mut paired = Frame::filled(640, 480, [0, 0, 0])?;
    paired.set_pixel(0, 0, [7, 8, 9]);
    let detector = ScriptedDetector::new([ScriptStep::Silence, ScriptStep::Line(HEAD_LINE.into())]);
    let source = ScriptedSource::new([Some(paired), Some(Frame::filled(640, 480, [1, 1, 1])?)]);
    let mut sync = SyncLoop::new(settings(1), detector, source, HeadlessDisplay::new())
        .with_store(FilesystemArtifactStore::new(&out));

    sync.step()?;
    let report = sync.step()?;
    let key = report.persisted.expect("batch persisted");
    assert_eq!(report.rendered, Rendered::Annotated);

    let store = FilesystemArtifactStore::new(&out);
    assert_eq!(store.complete_keys()?, vec![key.clone()]);
    assert_eq!(std::fs::read_dir(&out)?.count(), 2);

    let (json_path, image_path) = store.paths_for(&key);
    assert_eq!(std::fs::read_to_string(json_path)?, HEAD_LINE);
    let img = image::open(image_path)?.to_rgb8();
    assert_eq!(img.dimensions(), (640, 480));
    assert_eq!(img.get_pixel(0, 0).0, [7, 8, 9]);
    // no rectangle on the stored frame
    assert_eq!(img.get_pixel(64, 96).0, [0, 0, 0]);

    sync.shutdown()?;
    Ok(())
}

#[test]
fn still_images_drive_the_loop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (name, shade) in [("a.png", 40u8), ("b.png", 200u8)] {
        Frame::filled(32, 24, [shade, shade, shade])?
            .to_rgb_image()?
            .save(dir.path().join(name))?;
    }
    let source = open_source(&SourceSettings {
        uri: format!("dir:{}", dir.path().display()),
        width: 32,
        height: 24,
        target_fps: 10,
    })?;
    let detector = ScriptedDetector::from_lines(["booting", HEAD_LINE, "[]"]);
    let mut sync = SyncLoop::new(
        LoopSettings {
            max_iterations: Some(6),
            ..settings(1)
        },
        detector,
        source,
        HeadlessDisplay::new(),
    );

    let stats = sync.run()?;
    assert_eq!(stats.iterations, 6);
    assert_eq!(stats.frames_captured, 6);
    assert_eq!(stats.diagnostics, 1);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.annotations, 2);
    assert_eq!(stats.artifacts_written, 0);
    assert_eq!(sync.display().frames_shown(), 6);
    assert_eq!(sync.display().last_size(), Some((32, 24)));
    assert!(sync.display().is_closed());
    Ok(())
}

#[test]
fn silent_detector_keeps_raw_frames_flowing() -> Result<()> {
    let detector = fake_detector(&["--interval-ms", "60000"]);
    let source = ScriptedSource::repeat(Frame::filled(16, 16, [0, 0, 0])?, 10);
    let mut sync = SyncLoop::new(settings(20), detector, source, HeadlessDisplay::new());

    let started = Instant::now();
    for _ in 0..5 {
        let report = sync.step()?;
        assert_eq!(report.line, LineOutcome::Nothing);
        assert_eq!(report.rendered, Rendered::Raw);
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    sync.shutdown()?;
    assert!(sync.detector().exit_status().is_some());
    Ok(())
}

#[test]
fn fake_detector_output_reaches_the_loop() -> Result<()> {
    let detector = fake_detector(&[
        "--interval-ms",
        "5",
        "--count",
        "4",
        "--diagnostic-every",
        "2",
    ]);
    let source = ScriptedSource::repeat(Frame::filled(64, 48, [0, 0, 0])?, 10_000);
    let mut sync = SyncLoop::new(settings(20), detector, source, HeadlessDisplay::new());

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        sync.step()?;
        let stats = sync.state().stats();
        if stats.batches == 4 && stats.diagnostics == 2 {
            break;
        }
    }
    let stats = sync.state().stats().clone();
    assert_eq!(stats.batches, 4);
    assert_eq!(stats.diagnostics, 2);
    assert!(stats.annotations >= 3);
    assert!(sync.state().annotated().is_some());

    sync.shutdown()?;
    assert_eq!(sync.detector().lines_read(), 6);
    Ok(())
}

#[test]
fn supervised_detector_gives_up_and_ends_run() -> Result<()> {
    let detector = SupervisedDetector::new(
        fake_detector(&["--interval-ms", "1", "--count", "1"]),
        RestartPolicy {
            max_restarts: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
        },
    );
    let source = ScriptedSource::repeat(Frame::filled(8, 8, [0, 0, 0])?, 100_000);
    let mut sync = SyncLoop::new(
        LoopSettings {
            max_iterations: Some(5_000),
            ..settings(10)
        },
        detector,
        source,
        HeadlessDisplay::new(),
    );

    let err = sync.run().expect_err("detector exhausts its restarts");
    assert!(format!("{:#}", err).contains("after 2 restart(s)"));
    assert_eq!(sync.detector().restarts(), 2);
    assert_eq!(sync.state().stats().batches, 3);
    assert!(sync.display().is_closed());
    assert!(sync.detector().inner().pid().is_none());
    Ok(())
}
