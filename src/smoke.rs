use crate::envcheck::{self, PackageResolver};
use crate::error::ToolError;
use crate::export::{ExportFormat, ExportOptions, Exporter};
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Checkpoint identifier the toolchain resolves (and downloads) itself when
/// no model is supplied.
pub const DEFAULT_CHECKPOINT: &str = "yolov8n.pt";

/// End-to-end exercise of the export pipeline: environment check, then a
/// fixed-parameter ONNX export, then artifact presence.
pub fn run_smoke_test<R: PackageResolver, E: Exporter>(
    model: Option<&Path>,
    resolver: &mut R,
    exporter: &mut E,
) -> Result<(), ToolError> {
    info!("checking environment before export test");
    let report = envcheck::check_environment(resolver, |_| false);
    if !report.is_ready() {
        return Err(ToolError::Environment(
            "missing requirements, aborting export test".to_string(),
        ));
    }

    let model = match model {
        Some(path) if path.is_file() => path.to_string_lossy().into_owned(),
        Some(path) => {
            return Err(ToolError::Input(format!(
                "model file does not exist: {}",
                path.display()
            )));
        }
        None => {
            info!("no model given, using default checkpoint {DEFAULT_CHECKPOINT}");
            DEFAULT_CHECKPOINT.to_string()
        }
    };

    info!("exporting {model} to onnx");
    let options = ExportOptions::new(&ExportFormat::Onnx, 640);
    let artifact = exporter.export(&model, &options).map_err(|e| {
        error!("export failed: {e:?}");
        ToolError::Export(e)
    })?;

    match fs::metadata(&artifact) {
        Ok(meta) => {
            info!(
                "export test passed: {} ({:.1} MB)",
                artifact.display(),
                meta.len() as f64 / 1024.0 / 1024.0
            );
            Ok(())
        }
        Err(_) => {
            error!("export reported success but produced no file");
            Err(ToolError::Validation(format!(
                "no artifact at {}",
                artifact.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envcheck::PackageStatus;
    use crate::export::tests::{FakeExporter, temp_path, write_bytes};
    use crate::export::ModelInfo;

    struct StubResolver {
        ready: bool,
    }

    impl PackageResolver for StubResolver {
        fn python_version(&mut self) -> Option<(u32, u32)> {
            Some((3, 11))
        }

        fn resolve(&mut self, name: &str) -> PackageStatus {
            if self.ready {
                PackageStatus {
                    name: name.to_string(),
                    installed: true,
                    version: Some("1.0.0".to_string()),
                }
            } else {
                PackageStatus::missing(name)
            }
        }

        fn install(&mut self, _name: &str) -> bool {
            panic!("smoke test must not attempt installation");
        }
    }

    #[test]
    fn test_aborts_when_environment_not_ready() {
        let mut resolver = StubResolver { ready: false };
        let mut exporter = FakeExporter::default();
        let err = run_smoke_test(None, &mut resolver, &mut exporter).unwrap_err();
        assert!(matches!(err, ToolError::Environment(_)));
        assert!(exporter.export_calls.is_empty());
    }

    #[test]
    fn test_missing_explicit_model_is_input_error() {
        let mut resolver = StubResolver { ready: true };
        let mut exporter = FakeExporter::default();
        let missing = temp_path("smoke-missing.pt");
        let err = run_smoke_test(Some(&missing), &mut resolver, &mut exporter).unwrap_err();
        assert!(matches!(err, ToolError::Input(_)));
        assert!(exporter.export_calls.is_empty());
    }

    #[test]
    fn test_default_checkpoint_fixed_parameters() {
        let artifact = temp_path("smoke-default.onnx");
        let mut resolver = StubResolver { ready: true };
        let mut exporter = FakeExporter {
            info: ModelInfo::default(),
            artifact: Some((artifact.clone(), Some(4096))),
            ..Default::default()
        };

        run_smoke_test(None, &mut resolver, &mut exporter).unwrap();

        let (model, options) = &exporter.export_calls[0];
        assert_eq!(model, DEFAULT_CHECKPOINT);
        assert_eq!(options.format, "onnx");
        assert_eq!(options.imgsz, 640);

        let _ = fs::remove_file(&artifact);
    }

    #[test]
    fn test_explicit_model_is_used() {
        let model = temp_path("smoke-model.pt");
        let artifact = temp_path("smoke-model.onnx");
        write_bytes(&model, 8);

        let mut resolver = StubResolver { ready: true };
        let mut exporter = FakeExporter {
            artifact: Some((artifact.clone(), Some(2048))),
            ..Default::default()
        };
        run_smoke_test(Some(&model), &mut resolver, &mut exporter).unwrap();
        assert_eq!(exporter.export_calls[0].0, model.to_string_lossy());

        let _ = fs::remove_file(&model);
        let _ = fs::remove_file(&artifact);
    }

    #[test]
    fn test_missing_artifact_is_validation_failure() {
        let mut resolver = StubResolver { ready: true };
        let mut exporter = FakeExporter {
            artifact: Some((temp_path("smoke-ghost.onnx"), None)),
            ..Default::default()
        };
        let err = run_smoke_test(None, &mut resolver, &mut exporter).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
