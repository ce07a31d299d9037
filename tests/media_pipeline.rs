#[cfg(feature = "media-ffmpeg")]
mod media_pipeline {
    use std::{
        path::Path,
        process::Command,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use stillreel::{
        BufferSource, CanvasSize, ContentMode, FfmpegEncoder, Fps, FrameSpec, PixelBuffer,
        PixelBufferPool, PoolConfig, ReelError, ReelJob, ReelResult, Session, SessionConfig,
        SessionState, SourceImage, run_job,
    };

    fn ffmpeg_tools_available() -> bool {
        let ffprobe_ok = Command::new("ffprobe")
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        stillreel::is_ffmpeg_on_path() && ffprobe_ok
    }

    fn probe(path: &Path, entry: &str) -> String {
        let out = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-count_frames",
                "-select_streams",
                "v:0",
                "-show_entries",
                &format!("stream={entry}"),
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .unwrap();
        assert!(out.status.success());
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn session_writes_one_frame_per_image() {
        if !ffmpeg_tools_available() {
            return;
        }
        let dir = std::env::temp_dir().join(format!("stillreel_media_{}", std::process::id()));
        let cfg = SessionConfig::new("session.mp4", CanvasSize::new(64, 96).unwrap())
            .with_output_dir(&dir)
            .with_fps(Fps::integer(24).unwrap());
        let mut session = Session::new(cfg, FfmpegEncoder::new([0, 0, 0, 255]), |_| {}, |_| {});
        let completion = session.completion();

        session.start().unwrap();
        let red = SourceImage::solid(64, 64, [255, 0, 0, 255]).unwrap();
        let blue = SourceImage::solid(120, 40, [0, 0, 255, 255]).unwrap();
        for i in 0..24 {
            let (img, mode) = if i % 2 == 0 {
                (&red, None)
            } else {
                (&blue, Some(ContentMode::Fill))
            };
            session.add_image(img, mode).unwrap();
        }
        session.finish().unwrap();

        let report = completion.wait();
        assert_eq!(report.state, SessionState::Finalized, "{:?}", report.error);
        let out = report.output.unwrap();
        assert_eq!(probe(&out, "nb_read_frames"), "24");
        assert_eq!(probe(&out, "width"), "64");
        assert_eq!(probe(&out, "height"), "96");
        assert_eq!(probe(&out, "r_frame_rate"), "24/1");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn job_holds_images_for_their_frame_count() {
        if !ffmpeg_tools_available() {
            return;
        }
        let dir = std::env::temp_dir().join(format!("stillreel_job_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.png");
        image::RgbaImage::from_pixel(32, 32, image::Rgba([0, 255, 0, 255]))
            .save(&a)
            .unwrap();

        let job = ReelJob {
            session: SessionConfig::new("job.mp4", CanvasSize::new(32, 32).unwrap())
                .with_output_dir(&dir),
            frames: vec![FrameSpec {
                path: a,
                mode: None,
                hold: 5,
            }],
            background_rgba: [0, 0, 0, 255],
            library_dir: Some(dir.join("library")),
        };
        let report = run_job(&job, FfmpegEncoder::new(job.background_rgba)).unwrap();
        assert_eq!(report.state, SessionState::Finalized, "{:?}", report.error);
        assert_eq!(report.frames, 5);
        assert!(dir.join("library").join("job.mp4").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Pool that refuses exactly one acquisition.
    struct FlakyPool {
        inner: PixelBufferPool,
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl BufferSource for FlakyPool {
        fn acquire_buffer(&self, canvas: CanvasSize) -> ReelResult<PixelBuffer> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(ReelError::pool_exhausted("transient"));
            }
            self.inner.acquire_buffer(canvas)
        }
    }

    #[test]
    fn one_missed_frame_does_not_stall_the_encoder() {
        if !ffmpeg_tools_available() {
            return;
        }
        let dir = std::env::temp_dir().join(format!("stillreel_gap_{}", std::process::id()));
        let canvas = CanvasSize::new(32, 32).unwrap();
        let cfg = SessionConfig::new("gap.mp4", canvas).with_output_dir(&dir);
        let pool = FlakyPool {
            inner: PixelBufferPool::new(canvas, PoolConfig::default()).unwrap(),
            calls: AtomicUsize::new(0),
            fail_on: 5,
        };
        let mut session = Session::new(cfg, FfmpegEncoder::new([0, 0, 0, 255]), |_| {}, |_| {})
            .with_buffer_source(Box::new(pool));
        let completion = session.completion();

        session.start().unwrap();
        let img = SourceImage::solid(32, 32, [200, 200, 0, 255]).unwrap();
        for _ in 0..10 {
            session.add_image(&img, None).unwrap();
        }
        let recorded = session.recorded_error().map(|e| e.to_string()).unwrap();
        assert!(recorded.contains("frame 5"), "{recorded}");
        assert!(recorded.contains("transient"), "{recorded}");
        session.finish().unwrap();

        let report = completion.wait();
        assert_eq!(report.state, SessionState::Failed);
        let msg = report.error.unwrap();
        assert!(!msg.contains("out of order"), "{msg}");
        assert_eq!(probe(&report.output.unwrap(), "nb_read_frames"), "10");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
