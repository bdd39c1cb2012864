use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use neuralock_core::dots::DotStages;
use neuralock_core::profiles::list_profiles;
use neuralock_core::{
    FaceRegion, Frame, HeatmapBuilder, LivenessChecker, LivenessConfig, LivenessVerdict,
    ReferenceSource, SignalAssessment,
};
use neuralock_models::DepthAnything;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;

use config::Settings;

const FACE_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const DOT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const REJECTED_BLOB_COLOR: Rgb<u8> = Rgb([0, 128, 255]);

/// How long exit waits for blocking checks still running after a timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "neuralock", about = "Structured-light face liveness checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Face box in the capture as X,Y,W,H
    #[arg(long, value_parser = parse_face)]
    face: FaceRegion,
    /// Named profile (default: $NEURALOCK_PROFILE or "default")
    #[arg(long)]
    profile: Option<String>,
    /// TOML file with overrides on top of the profile
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run liveness checks, printing one JSON verdict per image
    Check {
        /// IR captures; each is checked as an independent access attempt
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// ONNX depth model for the monocular reference
        #[arg(long)]
        depth_model: Option<PathBuf>,
        /// Per-image timeout (default: $NEURALOCK_TIMEOUT_SECS or 10)
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Write dot-extraction stages and the heatmap here
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Extract dots and report signal strength
    Dots {
        image: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Write the capture with face box and dots drawn
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Render the pseudo-depth map of the face crop
    PseudoDepth {
        image: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List embedded profiles
    Profiles,
}

/// One `check` result. Anything but a live verdict is a rejection.
#[derive(Serialize)]
struct CheckReport {
    image: String,
    live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<LivenessVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckReport {
    fn rejected(image: &Path, error: String) -> Self {
        Self {
            image: image.display().to_string(),
            live: false,
            verdict: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
struct DotsReport {
    image: String,
    face: FaceRegion,
    blobs: usize,
    signal: SignalAssessment,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let code = runtime.block_on(run(cli));
    shutdown_runtime(runtime);
    code
}

/// Timed-out checks keep running on blocking threads; abandon them instead
/// of waiting for them at exit.
fn shutdown_runtime(runtime: tokio::runtime::Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::from_env();

    match cli.command {
        Commands::Check {
            images,
            pipeline,
            depth_model,
            timeout_secs,
            dump_dir,
        } => {
            let config = settings.liveness_config(pipeline.profile.as_deref(), pipeline.config.as_deref())?;
            let checker = build_checker(&settings, config, depth_model)?;
            let timeout = Duration::from_secs(timeout_secs.unwrap_or(settings.timeout_secs));
            let all_live = run_checks(Arc::new(checker), images, pipeline.face, timeout, dump_dir).await?;
            return Ok(if all_live { ExitCode::SUCCESS } else { ExitCode::from(1) });
        }
        Commands::Dots {
            image,
            pipeline,
            overlay,
        } => {
            let config = settings.liveness_config(pipeline.profile.as_deref(), pipeline.config.as_deref())?;
            let checker = LivenessChecker::new(config)?;
            let frame = load_frame(&image)?;
            let stages = checker.extractor().extract_with_stages(&frame, &pipeline.face);
            let signal = SignalAssessment::assess(&stages.dots, &checker.config().signal, frame.is_dark());

            if let Some(path) = overlay {
                draw_overlay(&frame, &pipeline.face, &stages)
                    .save(&path)
                    .with_context(|| format!("writing overlay {}", path.display()))?;
            }

            let report = DotsReport {
                image: image.display().to_string(),
                face: pipeline.face,
                blobs: stages.blobs.len(),
                signal,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::PseudoDepth {
            image,
            pipeline,
            output,
        } => {
            let config = settings.liveness_config(pipeline.profile.as_deref(), pipeline.config.as_deref())?;
            let checker = LivenessChecker::new(config)?;
            let frame = load_frame(&image)?;
            let map = checker.pseudo_depth(&frame, &pipeline.face)?;
            for skipped in &map.skipped {
                tracing::warn!(stage = %skipped.stage(), error = %skipped, "pseudo-depth stage skipped");
            }
            save_frame(&map.image, &output)?;
            println!(
                "wrote {}x{} pseudo-depth map to {}",
                map.image.width(),
                map.image.height(),
                output.display()
            );
        }
        Commands::Profiles => {
            for profile in list_profiles() {
                println!("{:<10} {}", profile.profile.name, profile.profile.description);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Checker with the depth model attached when the config asks for it.
///
/// An unloadable model is not fatal: the pipeline falls back to pseudo-depth.
fn build_checker(settings: &Settings, config: LivenessConfig, depth_model: Option<PathBuf>) -> Result<LivenessChecker> {
    let wants_model = config.scoring.reference == ReferenceSource::MonocularModel;
    let mut checker = LivenessChecker::new(config)?;
    if wants_model {
        let path = depth_model.unwrap_or_else(|| settings.depth_model.clone());
        match DepthAnything::load(&path) {
            Ok(model) => checker = checker.with_depth_model(Box::new(model)),
            Err(e) => tracing::warn!(
                error = %e,
                model_dir = %settings.model_dir.display(),
                "depth model unavailable"
            ),
        }
    }
    Ok(checker)
}

/// Check every image in parallel, each under its own timeout, and print the
/// reports in input order. Returns whether every image was live.
async fn run_checks(
    checker: Arc<LivenessChecker>,
    images: Vec<PathBuf>,
    face: FaceRegion,
    timeout: Duration,
    dump_dir: Option<PathBuf>,
) -> Result<bool> {
    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let checker = Arc::clone(&checker);
            let dump_dir = dump_dir.clone();
            tokio::spawn(async move {
                let path = image.clone();
                let work = tokio::task::spawn_blocking(move || {
                    check_image(&checker, &path, &face, dump_dir.as_deref())
                });
                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(Ok(verdict))) => CheckReport {
                        image: image.display().to_string(),
                        live: verdict.is_live,
                        verdict: Some(verdict),
                        error: None,
                    },
                    Ok(Ok(Err(e))) => CheckReport::rejected(&image, format!("{e:#}")),
                    Ok(Err(e)) => CheckReport::rejected(&image, format!("check panicked: {e}")),
                    Err(_) => {
                        tracing::warn!(image = %image.display(), ?timeout, "liveness check timed out");
                        CheckReport::rejected(&image, format!("timed out after {}s", timeout.as_secs()))
                    }
                }
            })
        })
        .collect();

    let mut all_live = true;
    for handle in handles {
        let report = handle.await?;
        all_live &= report.live;
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(all_live)
}

fn check_image(
    checker: &LivenessChecker,
    image: &Path,
    face: &FaceRegion,
    dump_dir: Option<&Path>,
) -> Result<LivenessVerdict> {
    let frame = load_frame(image)?;
    if let Some(dir) = dump_dir {
        dump_stages(checker, &frame, face, image, dir)?;
    }
    Ok(checker.check_liveness(&frame, face)?)
}

/// Write the dot-extraction stages, overlay and heatmap of one capture.
fn dump_stages(checker: &LivenessChecker, frame: &Frame, face: &FaceRegion, image: &Path, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());

    let stages = checker.extractor().extract_with_stages(frame, face);
    let gray_stages: [(&str, &GrayImage); 5] = [
        ("gray", &stages.gray),
        ("inverted", &stages.inverted),
        ("enhanced", &stages.enhanced),
        ("binary", &stages.binary),
        ("opened", &stages.opened),
    ];
    for (name, img) in gray_stages {
        let path = dir.join(format!("{stem}_{name}.png"));
        img.save(&path).with_context(|| format!("writing {}", path.display()))?;
    }

    let path = dir.join(format!("{stem}_overlay.png"));
    draw_overlay(frame, face, &stages)
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;

    if let Some(region) = face.clamp_to(frame.width(), frame.height()) {
        let heatmap = HeatmapBuilder::new(checker.config().heatmap.interpolation).build(&stages.dots, &region);
        let path = dir.join(format!("{stem}_heatmap.png"));
        heatmap
            .render()
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    tracing::debug!(dir = %dir.display(), image = %stem, dots = stages.dots.len(), "dumped stages");
    Ok(())
}

/// Capture with the face box, accepted dots and rejected blobs drawn.
fn draw_overlay(frame: &Frame, face: &FaceRegion, stages: &DotStages) -> RgbImage {
    let mut canvas = frame.to_rgb();
    if let Some(region) = face.clamp_to(frame.width(), frame.height()) {
        let rect = Rect::at(region.x, region.y).of_size(region.width as u32, region.height as u32);
        draw_hollow_rect_mut(&mut canvas, rect, FACE_BOX_COLOR);
    }
    for blob in &stages.blobs {
        if !face.contains_strictly(blob.x, blob.y) {
            let r = blob.radius.round().max(1.0) as i32;
            draw_hollow_circle_mut(&mut canvas, (blob.x as i32, blob.y as i32), r, REJECTED_BLOB_COLOR);
        }
    }
    for dot in stages.dots.iter() {
        draw_hollow_circle_mut(&mut canvas, (dot.x as i32, dot.y as i32), 3, DOT_COLOR);
    }
    canvas
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(Frame::from_dynamic(image))
}

fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let saved = match frame {
        Frame::Gray(img) => img.save(path),
        Frame::Color(img) => img.save(path),
    };
    saved.with_context(|| format!("writing {}", path.display()))
}

/// Parse `X,Y,W,H`.
fn parse_face(s: &str) -> Result<FaceRegion, String> {
    let parts: Vec<i32> = s
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid face box {s:?}: {e}"))?;
    match parts[..] {
        [x, y, w, h] => Ok(FaceRegion::new(x, y, w, h)),
        _ => Err(format!("face box needs 4 values X,Y,W,H, got {}", parts.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use image::Luma;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_face() {
        assert_eq!(parse_face("10,20,100,120").unwrap(), FaceRegion::new(10, 20, 100, 120));
        assert_eq!(parse_face(" -5, 0, 30 ,40").unwrap(), FaceRegion::new(-5, 0, 30, 40));
        assert!(parse_face("10,20,100").is_err());
        assert!(parse_face("a,b,c,d").is_err());
    }

    #[test]
    fn test_check_args_parse() {
        let cli = Cli::try_parse_from([
            "neuralock", "check", "a.png", "b.png", "--face", "1,2,3,4", "--timeout-secs", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Check {
                images,
                pipeline,
                timeout_secs,
                ..
            } => {
                assert_eq!(images.len(), 2);
                assert_eq!(pipeline.face, FaceRegion::new(1, 2, 3, 4));
                assert_eq!(timeout_secs, Some(5));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_overlay_draws_face_box() {
        let frame = Frame::Gray(GrayImage::from_pixel(60, 60, Luma([0])));
        let checker = LivenessChecker::new(LivenessConfig::default()).unwrap();
        let face = FaceRegion::new(10, 10, 40, 40);
        let stages = checker.extractor().extract_with_stages(&frame, &face);
        let canvas = draw_overlay(&frame, &face, &stages);
        assert_eq!(*canvas.get_pixel(10, 10), FACE_BOX_COLOR);
        assert_eq!(*canvas.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_shutdown_abandons_blocking_checks() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let started = std::time::Instant::now();
        runtime.block_on(async {
            let work = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(10)));
            assert!(tokio::time::timeout(Duration::from_millis(50), work).await.is_err());
        });
        shutdown_runtime(runtime);
        assert!(started.elapsed() < Duration::from_secs(5), "waited {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_unreadable_image_is_rejected() {
        let checker = Arc::new(LivenessChecker::new(LivenessConfig::default()).unwrap());
        let live = run_checks(
            checker,
            vec![PathBuf::from("/nonexistent/capture.png")],
            FaceRegion::new(0, 0, 10, 10),
            Duration::from_secs(5),
            None,
        )
        .await
        .unwrap();
        assert!(!live);
    }
}
