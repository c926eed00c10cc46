use crate::error::ToolError;
use anyhow::Result;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

/// Artifacts below this size are treated as corrupt even when the export
/// call itself reported success.
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

/// Task name the toolchain reports for oriented-bounding-box checkpoints.
const OBB_TASK: &str = "obb";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportFormat {
    Onnx,
    Torchscript,
    Coreml,
    Tflite,
    Pb,
    Other(String),
}

impl ExportFormat {
    /// Format token the export toolchain expects.
    pub fn token(&self) -> &str {
        match self {
            ExportFormat::Onnx => "onnx",
            ExportFormat::Torchscript => "torchscript",
            ExportFormat::Coreml => "coreml",
            ExportFormat::Tflite => "tflite",
            ExportFormat::Pb => "pb",
            ExportFormat::Other(s) => s,
        }
    }

    /// File extension for derived output paths. Unrecognized formats use
    /// the format token itself.
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Coreml => "mlmodel",
            _ => self.token(),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "onnx" => ExportFormat::Onnx,
            "torchscript" => ExportFormat::Torchscript,
            "coreml" => ExportFormat::Coreml,
            "tflite" => ExportFormat::Tflite,
            "pb" => ExportFormat::Pb,
            other => ExportFormat::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub format: ExportFormat,
    pub image_size: u32,
}

/// Keyword arguments handed to the export call. Field names match the
/// toolchain's keyword names; ONNX-only knobs stay unset for other formats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportOptions {
    pub format: String,
    pub imgsz: u32,
    pub optimize: bool,
    pub half: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opset: Option<u32>,
}

impl ExportOptions {
    pub fn new(format: &ExportFormat, image_size: u32) -> Self {
        let onnx = matches!(format, ExportFormat::Onnx);
        Self {
            format: format.token().to_string(),
            imgsz: image_size,
            optimize: true,
            // Half precision trades compatibility for size; keep it off.
            half: false,
            dynamic: onnx.then_some(false),
            simplify: onnx.then_some(true),
            opset: onnx.then_some(11),
        }
    }
}

/// Metadata the toolchain reports for a loaded checkpoint. Checkpoints are
/// not required to declare either field.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ModelInfo {
    pub task: Option<String>,
    pub class_names: Option<Vec<String>>,
}

/// External model-loading-and-export boundary. `model` is a path or a
/// well-known checkpoint identifier the toolchain resolves itself.
pub trait Exporter {
    fn load_info(&mut self, model: &str) -> Result<ModelInfo>;

    /// Run the export and return the path of the produced artifact.
    fn export(&mut self, model: &str, options: &ExportOptions) -> Result<PathBuf>;
}

/// Replace the input's extension with the format's fixed one.
pub fn derive_output_path(input: &Path, format: &ExportFormat) -> PathBuf {
    input.with_extension(format.extension())
}

/// Convert a checkpoint, returning the validated artifact path.
pub fn convert<E: Exporter>(
    request: &ExportRequest,
    exporter: &mut E,
) -> Result<PathBuf, ToolError> {
    let input = &request.input;
    if !input.is_file() {
        return Err(ToolError::Input(format!(
            "input model does not exist: {}",
            input.display()
        )));
    }

    info!(
        "converting {} (format: {}, image size: {})",
        input.display(),
        request.format,
        request.image_size
    );

    let model = input.to_string_lossy();
    let model_info = exporter.load_info(&model).map_err(|e| {
        error!("failed to load checkpoint: {e:?}");
        ToolError::Export(e)
    })?;
    match model_info.task.as_deref() {
        Some(OBB_TASK) => {}
        Some(task) => warn!("model task is '{task}', not {OBB_TASK}; converting anyway"),
        None => warn!("model declares no task; converting anyway"),
    }

    let output = match &request.output {
        Some(path) => path.clone(),
        None => derive_output_path(input, &request.format),
    };
    info!("output path: {}", output.display());

    let options = ExportOptions::new(&request.format, request.image_size);
    let artifact = exporter.export(&model, &options).map_err(|e| {
        error!("export failed: {e:?}");
        ToolError::Export(e)
    })?;

    validate_artifact(&artifact)?;
    info!("conversion complete: {}", artifact.display());
    Ok(artifact)
}

/// The export call reporting success is not enough: the artifact must exist
/// and be plausibly sized, or the export is untrustworthy.
fn validate_artifact(artifact: &Path) -> Result<(), ToolError> {
    let size = match fs::metadata(artifact) {
        Ok(meta) => meta.len(),
        Err(_) => {
            error!("export reported success but produced no file");
            return Err(ToolError::Validation(format!(
                "no artifact at {}",
                artifact.display()
            )));
        }
    };

    info!("artifact size: {:.1} MB", size as f64 / 1024.0 / 1024.0);
    if size < MIN_ARTIFACT_BYTES {
        warn!("artifact is only {size} bytes, treating the export as failed");
        return Err(ToolError::Validation(format!(
            "artifact implausibly small ({size} bytes)"
        )));
    }

    Ok(())
}

/// Load a checkpoint and report its task and leading class names.
pub fn inspect<E: Exporter>(model: &str, exporter: &mut E) -> Result<ModelInfo, ToolError> {
    info!("inspecting {model}");
    let model_info = exporter.load_info(model).map_err(|e| {
        error!("failed to load checkpoint: {e:?}");
        ToolError::Export(e)
    })?;

    info!(
        "task: {}",
        model_info.task.as_deref().unwrap_or("unknown")
    );
    if let Some(names) = &model_info.class_names {
        let shown = &names[..names.len().min(10)];
        info!("{} classes, first {}: {:?}", names.len(), shown.len(), shown);
    }

    Ok(model_info)
}
