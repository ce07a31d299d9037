use std::path::{Path, PathBuf};

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_stillreel")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "stillreel.exe"
            } else {
                "stillreel"
            });
            p
        })
}

fn write_png(path: &Path, w: u32, h: u32, rgba: [u8; 4]) {
    image::RgbaImage::from_pixel(w, h, image::Rgba(rgba))
        .save(path)
        .unwrap();
}

#[test]
fn cli_render_rejects_missing_job() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let missing = dir.join("no_such_job.json");
    let _ = std::fs::remove_file(&missing);

    let output = std::process::Command::new(exe())
        .args(["render", "--in"])
        .arg(&missing)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no_such_job.json"), "stderr: {stderr}");
}

#[test]
fn cli_images_writes_mp4() {
    if !stillreel::is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }

    let dir = PathBuf::from("target").join("cli_smoke").join("images");
    std::fs::create_dir_all(&dir).unwrap();
    let a = dir.join("a.png");
    let b = dir.join("b.png");
    write_png(&a, 64, 64, [255, 0, 0, 255]);
    write_png(&b, 96, 48, [0, 0, 255, 255]);

    let out_dir = dir.join("out");
    let status = std::process::Command::new(exe())
        .args([
            "images", "--out", "smoke.mp4", "--width", "64", "--height", "64", "--fps", "12",
            "--hold", "6", "--out-dir",
        ])
        .arg(&out_dir)
        .arg(&a)
        .arg(&b)
        .status()
        .unwrap();

    assert!(status.success());
    let meta = std::fs::metadata(out_dir.join("smoke.mp4")).unwrap();
    assert!(meta.len() > 0);
}
