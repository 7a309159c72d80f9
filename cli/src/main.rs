//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Minimal demonstration harness. Argument parsing and config file loading
//! are deliberately out of scope for the core crate, so this binary stays a
//! thin, interactive driver rather than a full CLI.

use std::io::{stdin, stdout, Write};

use lucidwatch_core::alert::Alerter;
use lucidwatch_core::config::{AlertMode, ConfigSnapshot, RawConfig};
use lucidwatch_core::describe::Describer;
use lucidwatch_core::detect::DetectionCascade;
use lucidwatch_core::pipeline::Supervisor;

fn build_supervisor(uri: String) -> anyhow::Result<Supervisor> {
    let mut raw = RawConfig::default();
    raw.alert_mode = AlertMode::Instant;
    let cfg = ConfigSnapshot::validate(raw)?;

    let cascade = DetectionCascade::new(&cfg, None, None);
    let describer = Describer::new(vec![]);
    let alerter = Alerter::new(
        cfg.alert_mode,
        std::time::Duration::from_secs_f64(cfg.instant_min_interval_secs),
        std::time::Duration::from_secs_f64(cfg.digest_interval_secs),
        std::time::Duration::from_secs_f64(cfg.cooldown_secs),
        vec![],
    );

    Ok(Supervisor::new(cfg, uri, cascade, describer, alerter))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Select mode:");
    println!("1. Live source (rtsp://, http(s)://, device://, screen://)");
    #[cfg(feature = "file_mode")]
    println!("2. File mode (process an MP4 file in-process)");
    #[cfg(not(feature = "file_mode"))]
    println!("2. File mode (process an MP4 file) [disabled: build without file_mode feature]");
    print!("Enter choice (1 or 2): ");
    stdout().flush().ok();

    let mut mode_input = String::new();
    stdin().read_line(&mut mode_input)?;

    match mode_input.trim() {
        "1" => run_live_source().await,
        "2" => {
            #[cfg(feature = "file_mode")]
            {
                print!("Enter MP4 file path: ");
                stdout().flush().ok();
                let mut path = String::new();
                stdin().read_line(&mut path)?;
                run_file_mode(path.trim()).await
            }
            #[cfg(not(feature = "file_mode"))]
            {
                println!("File mode disabled. Rebuild with --features file_mode.");
                Ok(())
            }
        }
        _ => {
            println!("Invalid selection. Exiting.");
            Ok(())
        }
    }
}

async fn run_live_source() -> anyhow::Result<()> {
    print!("Enter a source URI (rtsp://, http(s)://, file://, device://, screen://): ");
    stdout().flush().ok();
    let mut uri = String::new();
    stdin().read_line(&mut uri)?;
    let uri = uri.trim().to_string();

    let mut supervisor = build_supervisor(uri)?;
    let token = supervisor.cancellation_token();

    let ctrl_c = async move {
        let _ = tokio::signal::ctrl_c().await;
        token.cancel();
    };

    tokio::select! {
        result = supervisor.run() => {
            if let Err(e) = result {
                eprintln!("pipeline exited: {e}");
            }
        }
        _ = ctrl_c => {
            println!("shutdown requested");
        }
    }

    Ok(())
}

/// Decodes an MP4 file directly via `video-rs`, bypassing the external
/// decoder subprocess entirely, and feeds each decoded frame straight into
/// a [`Supervisor`]. Useful for offline testing against a recording when no
/// `ffmpeg` binary is available on the host.
#[cfg(feature = "file_mode")]
async fn run_file_mode(video_path: &str) -> anyhow::Result<()> {
    use lucidwatch_core::frame::{FrameRef, PixelBuffer};

    video_rs::init().map_err(|e| anyhow::anyhow!("video-rs init failed: {e}"))?;

    let mut supervisor = build_supervisor(format!("file://{video_path}"))?;

    let mut decoder = video_rs::Decoder::new(std::path::Path::new(video_path))
        .map_err(|e| anyhow::anyhow!("failed to open {video_path}: {e}"))?;

    let target_fps = 3.0_f32;
    let min_gap = 1.0_f32 / target_fps;
    let mut last_emitted_at = f32::MIN;
    let mut seq = 0u64;

    for decoded in decoder.decode_iter() {
        let Ok((time, frame)) = decoded else {
            break;
        };
        let t = time.as_secs();
        if t < last_emitted_at + min_gap {
            continue;
        }
        last_emitted_at = t;

        let pixels = PixelBuffer::from_video_rs_frame(&frame)?;
        seq += 1;
        supervisor.ingest_frame(FrameRef::new(seq, pixels)).await;
    }

    supervisor.flush_alerts().await;
    println!("file mode finished after {seq} frames");
    Ok(())
}
