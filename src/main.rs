#![warn(unused_extern_crates)]
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::cell::Cell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ToolError;
use crate::export::{ExportFormat, ExportRequest};
use crate::python::{PythonEnv, SystemResolver, UltralyticsExporter};

mod envcheck;
mod error;
mod export;
mod python;
mod smoke;

#[derive(Parser, Debug)]
#[command(name = "obbport", version, about, long_about = None)]
struct CmdArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the local Python environment for required packages
    Check {
        /// Install missing packages without prompting
        #[arg(short, long)]
        yes: bool,

        /// Report only, never attempt installation
        #[arg(long, conflicts_with = "yes")]
        no_install: bool,
    },

    /// Convert an OBB checkpoint to a deployment format
    Convert {
        /// Path to the input checkpoint (.pt)
        input: PathBuf,

        /// Output path; derived from the input and format if omitted
        output: Option<PathBuf>,

        /// Target format: onnx, torchscript, coreml, tflite, pb
        #[arg(short, long, default_value = "onnx")]
        format: ExportFormat,

        /// Input image size
        #[arg(short, long, default_value_t = 640)]
        image_size: u32,
    },

    /// Load a checkpoint and report its task and class names
    Inspect {
        /// Checkpoint path or identifier
        model: String,
    },

    /// Smoke-test the export pipeline end to end
    Test {
        /// Checkpoint to exercise; downloads a small default if omitted
        model: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = match CmdArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                return ExitCode::SUCCESS;
            }
            println!("example: obbport convert yolov8n-obb.pt model.onnx --format onnx");
            return ExitCode::from(1);
        }
    };

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

fn run(command: Command) -> Result<(), ToolError> {
    match command {
        Command::Check { yes, no_install } => {
            let mut resolver = SystemResolver::discover();
            let cancelled = Cell::new(false);
            let report = envcheck::check_environment(&mut resolver, |missing| {
                if yes {
                    true
                } else if no_install {
                    false
                } else {
                    confirm_install(missing).unwrap_or_else(|| {
                        cancelled.set(true);
                        false
                    })
                }
            });
            if cancelled.get() {
                return Err(ToolError::Cancelled);
            }
            if report.is_ready() {
                info!("environment ready for model conversion");
                Ok(())
            } else {
                Err(ToolError::Environment(
                    "missing requirements, see report above".to_string(),
                ))
            }
        }

        Command::Convert {
            input,
            output,
            format,
            image_size,
        } => {
            let mut exporter = UltralyticsExporter::new(require_python()?);
            let request = ExportRequest {
                input,
                output,
                format,
                image_size,
            };
            export::convert(&request, &mut exporter).map(|_| ())
        }

        Command::Inspect { model } => {
            let mut exporter = UltralyticsExporter::new(require_python()?);
            export::inspect(&model, &mut exporter).map(|_| ())
        }

        Command::Test { model } => {
            let mut resolver = SystemResolver::discover();
            let mut exporter = UltralyticsExporter::new(require_python()?);
            smoke::run_smoke_test(model.as_deref(), &mut resolver, &mut exporter)
        }
    }
}

fn require_python() -> Result<PythonEnv, ToolError> {
    PythonEnv::discover().ok_or_else(|| {
        ToolError::Environment("no python interpreter on PATH (tried python3, python)".to_string())
    })
}

/// Ask on the terminal whether to install the missing packages. `None`
/// means the prompt was aborted (closed stdin, interrupted read) rather
/// than answered.
fn confirm_install(missing: &[String]) -> Option<bool> {
    print!("attempt to install {}? [y/N] ", missing.join(", "));
    let _ = io::stdout().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(n) if n > 0 => Some(matches!(
            line.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        )),
        _ => {
            warn!("installation prompt aborted");
            None
        }
    }
}
