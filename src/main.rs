//! MeterReader - utility meter reading capture
//!
//! Takes a photo of a meter, normalizes it to the OCR model's fixed 320x320
//! input, runs the model on a dedicated worker thread and shows the reading,
//! the annotated image and an execution log.

mod app;
mod capture;
mod config;
mod error;
mod shared;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::MeterReaderApp;
use crate::capture::{CaptureState, FileCamera, PermissionHandle};
use crate::config::AppConfig;
use crate::shared::{PresentationSnapshot, UiEvent};
use crate::vision::OnnxMeterModel;

/// Time allowed for one capture attempt in scripted mode
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);
/// Time allowed for the camera session to come up
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// MeterReader - capture a meter photo and read it with an OCR model
#[derive(Parser, Debug)]
#[command(name = "meter-reader")]
#[command(about = "Capture a utility meter photo and extract the reading")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image file or directory the camera photographs
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// ONNX meter model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Press the capture button this many times, then exit
    /// (interactive when omitted: Enter captures, `g` grants permission, `q` quits)
    #[arg(long)]
    captures: Option<usize>,

    /// Write the last annotated image to this PNG file
    #[arg(long)]
    save_annotated: Option<PathBuf>,

    /// Print the final presentation state as JSON
    #[arg(long)]
    json: bool,

    /// Save the effective configuration to the user config directory
    #[arg(long)]
    save_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("MeterReader starting...");

    let mut config = load_or_create_config(args.config.as_deref())?;
    if let Some(source) = args.source.clone() {
        config.capture.source = Some(source);
    }
    if let Some(model) = args.model.clone() {
        config.model.path = Some(model);
    }

    if args.save_config {
        let path = storage::get_config_dir()?.join("config.toml");
        config::save_config(&config, &path)?;
        info!("Configuration saved to {:?}", path);
    }

    let source = config
        .capture
        .source
        .clone()
        .context("No camera source configured (use --source or [capture] source)")?;
    let model_path = config
        .model
        .path
        .clone()
        .context("No OCR model configured (use --model or [model] path)")?;

    let output_path = storage::photo_output_path(&config.output)?;
    let camera = FileCamera::new(
        source,
        config.capture.initial_permission,
        config.capture.grant_on_request,
    );
    let permission = camera.permission_handle();
    let model = OnnxMeterModel::load(&model_path, config.model.onnx_config())?;

    let mut app =
        MeterReaderApp::new(camera, model, output_path)?.with_observer(print_changes());
    app.start();

    match args.captures {
        Some(count) => run_scripted(&mut app, count),
        None => run_interactive(&mut app, permission),
    }

    let presentation = app.presentation();
    if let Some(path) = &args.save_annotated {
        match &presentation.annotated_image {
            Some(image) => {
                image
                    .save(path)
                    .with_context(|| format!("Failed to save annotated image to {:?}", path))?;
                info!("Annotated image written to {:?}", path);
            }
            None => warn!("No annotated image to save"),
        }
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&presentation.snapshot())?);
    }

    info!("MeterReader shutdown complete");
    Ok(())
}

/// Load configuration from the given file, the default location, or defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable config {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Press the capture button `count` times, one attempt at a time
fn run_scripted(app: &mut MeterReaderApp<FileCamera>, count: usize) {
    // Idle after start means binding failed
    let ready = app.pump_until(STARTUP_TIMEOUT, |a| {
        matches!(
            a.capture_state(),
            CaptureState::Idle | CaptureState::Previewing | CaptureState::PermissionDenied
        )
    });
    if !ready || app.capture_state() != CaptureState::Previewing {
        warn!("Camera session not available ({})", app.capture_state());
        return;
    }

    let events = app.sender();
    for press in 0..count {
        let finished = app.attempts_finished();
        let _ = events.send(UiEvent::CaptureRequested);
        if !app.pump_until(ATTEMPT_TIMEOUT, |a| a.attempts_finished() > finished) {
            warn!("Capture {} did not finish within {:?}", press + 1, ATTEMPT_TIMEOUT);
            break;
        }
    }
}

/// Read button presses from stdin until `q` or end of input
fn run_interactive(app: &mut MeterReaderApp<FileCamera>, permission: PermissionHandle) {
    let events = app.sender();
    std::thread::spawn(move || {
        println!("Press Enter to capture, `g` to grant camera permission, `q` to quit");
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "" | "c" => UiEvent::CaptureRequested,
                "g" => {
                    permission.grant(&events);
                    continue;
                }
                "q" => break,
                other => {
                    println!("Unknown command {:?}", other);
                    continue;
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(UiEvent::Shutdown);
    });

    app.run();
}

/// Observer printing the text fields whenever they change
fn print_changes() -> app::PresentationObserver {
    let mut last: Option<(String, String)> = None;
    Box::new(move |state| {
        let PresentationSnapshot {
            execution_log,
            reading_text,
            ..
        } = state.snapshot();
        let current = (execution_log, reading_text);
        if last.as_ref() != Some(&current) {
            println!("Execution Log: {}", current.0);
            println!("{}", current.1);
            last = Some(current);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PermissionStatus;
    use crate::vision::dispatcher::testing::{Behaviour, FakeModel};
    use std::time::Instant;

    #[test]
    fn test_scripted_run_stops_when_preview_fails_to_bind() {
        let camera = FileCamera::new("/nonexistent/meter.jpg", PermissionStatus::Granted, true);
        let model = FakeModel::new(Behaviour::Read(Some("1".to_string())));
        let output = PathBuf::from("/tmp/captured_image.jpg");
        let mut app = MeterReaderApp::new(camera, model.clone(), output).unwrap();
        app.start();
        assert_eq!(app.capture_state(), CaptureState::Idle);

        let started = Instant::now();
        run_scripted(&mut app, 3);

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(app.attempts_finished(), 0);
        assert_eq!(model.calls(), 0);
    }
}
