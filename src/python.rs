use crate::envcheck::{PackageResolver, PackageStatus};
use crate::export::{Exporter, ExportOptions, ModelInfo};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

/// Reports whether a package imports and what version it claims.
const PROBE_PACKAGE: &str = r#"
import importlib, json, sys
try:
    module = importlib.import_module(sys.argv[1])
    print(json.dumps({"installed": True, "version": getattr(module, "__version__", None)}))
except ImportError:
    print(json.dumps({"installed": False, "version": None}))
"#;

/// Loads a checkpoint and reports its task and class names, when declared.
const PROBE_MODEL: &str = r#"
import json, sys
from ultralytics import YOLO
model = YOLO(sys.argv[1])
names = getattr(model, "names", None)
if isinstance(names, dict):
    names = [name for _, name in sorted(names.items())]
print(json.dumps({"task": getattr(model, "task", None), "class_names": names}))
"#;

/// Runs the export with kwargs passed as JSON in argv[2] and reports the
/// artifact path the toolchain returns.
const RUN_EXPORT: &str = r#"
import json, sys
from ultralytics import YOLO
model = YOLO(sys.argv[1])
path = model.export(**json.loads(sys.argv[2]))
print(json.dumps({"path": str(path)}))
"#;

/// Handle to the host Python interpreter.
#[derive(Debug, Clone)]
pub struct PythonEnv {
    program: String,
}

impl PythonEnv {
    /// Find a working interpreter on PATH.
    pub fn discover() -> Option<PythonEnv> {
        for candidate in ["python3", "python"] {
            let found = Command::new(candidate)
                .arg("--version")
                .output()
                .is_ok_and(|out| out.status.success());
            if found {
                debug!("using interpreter: {candidate}");
                return Some(PythonEnv {
                    program: candidate.to_string(),
                });
            }
        }
        None
    }

    pub fn version(&self) -> Result<(u32, u32)> {
        let stdout = self.run_snippet(
            "import sys; print(f\"{sys.version_info.major}.{sys.version_info.minor}\")",
            &[],
        )?;
        parse_version(stdout.trim())
            .with_context(|| format!("unparseable interpreter version: {stdout:?}"))
    }

    /// Run an inline snippet, returning captured stdout. Extra args are
    /// visible to the snippet as sys.argv[1..].
    fn run_snippet(&self, code: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(code)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn probe_package(&self, name: &str) -> Result<PackageStatus> {
        #[derive(Deserialize)]
        struct Probe {
            installed: bool,
            version: Option<String>,
        }

        let stdout = self.run_snippet(PROBE_PACKAGE, &[name])?;
        let probe: Probe = last_json(&stdout)
            .with_context(|| format!("no probe result for {name} in interpreter output"))?;
        Ok(PackageStatus {
            name: name.to_string(),
            installed: probe.installed,
            version: probe.version,
        })
    }

    /// Install a package with pip. Streams pip's own output to the console.
    pub fn pip_install(&self, package: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["-m", "pip", "install", package])
            .status()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        if !status.success() {
            bail!("pip install {package} exited with {status}");
        }
        Ok(())
    }
}

fn parse_version(s: &str) -> Option<(u32, u32)> {
    let (major, minor) = s.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// The toolchain logs progress to stdout around our JSON line; take the
/// last line that parses as the expected shape.
fn last_json<T: DeserializeOwned>(stdout: &str) -> Option<T> {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
}

/// `PackageResolver` backed by the host interpreter and pip. Missing
/// interpreter degrades to "nothing resolves" rather than failing outright.
pub struct SystemResolver {
    env: Option<PythonEnv>,
}

impl SystemResolver {
    pub fn discover() -> Self {
        let env = PythonEnv::discover();
        if env.is_none() {
            warn!("no python interpreter on PATH (tried python3, python)");
        }
        Self { env }
    }
}

impl PackageResolver for SystemResolver {
    fn python_version(&mut self) -> Option<(u32, u32)> {
        let env = self.env.as_ref()?;
        match env.version() {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("failed to query interpreter version: {e:?}");
                None
            }
        }
    }

    fn resolve(&mut self, name: &str) -> PackageStatus {
        let Some(env) = &self.env else {
            return PackageStatus::missing(name);
        };
        match env.probe_package(name) {
            Ok(status) => status,
            Err(e) => {
                warn!("probe for {name} failed: {e:?}");
                PackageStatus::missing(name)
            }
        }
    }

    fn install(&mut self, name: &str) -> bool {
        let Some(env) = &self.env else {
            return false;
        };
        match env.pip_install(name) {
            Ok(()) => true,
            Err(e) => {
                warn!("installation of {name} failed: {e:?}");
                false
            }
        }
    }
}

/// `Exporter` backed by the ultralytics toolchain running in the host
/// interpreter. Load and export may both hit the network (checkpoint
/// downloads) and take a while.
pub struct UltralyticsExporter {
    env: PythonEnv,
}

impl UltralyticsExporter {
    pub fn new(env: PythonEnv) -> Self {
        Self { env }
    }
}

impl Exporter for UltralyticsExporter {
    fn load_info(&mut self, model: &str) -> Result<ModelInfo> {
        info!("loading checkpoint {model}");
        let stdout = self.env.run_snippet(PROBE_MODEL, &[model])?;
        last_json(&stdout).context("no model metadata in toolchain output")
    }

    fn export(&mut self, model: &str, options: &ExportOptions) -> Result<PathBuf> {
        #[derive(Deserialize)]
        struct Exported {
            path: String,
        }

        let kwargs = serde_json::to_string(options).context("unserializable export options")?;
        debug!("export kwargs: {kwargs}");

        let stdout = self.env.run_snippet(RUN_EXPORT, &[model, &kwargs])?;
        debug!("toolchain output:\n{stdout}");
        let exported: Exported =
            last_json(&stdout).context("no artifact path in toolchain output")?;
        Ok(PathBuf::from(exported.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Line {
        path: String,
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.11"), Some((3, 11)));
        assert_eq!(parse_version("3.8.10"), None); // snippet prints major.minor only
        assert_eq!(parse_version("three.eight"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_last_json_skips_toolchain_noise() {
        let stdout = "PyTorch: starting export...\n\
                      ONNX: simplifying with onnxsim...\n\
                      {\"path\": \"model.onnx\"}\n";
        let line: Line = last_json(stdout).unwrap();
        assert_eq!(line.path, "model.onnx");
    }

    #[test]
    fn test_last_json_takes_last_match() {
        let stdout = "{\"path\": \"a.onnx\"}\n{\"path\": \"b.onnx\"}\n";
        let line: Line = last_json(stdout).unwrap();
        assert_eq!(line.path, "b.onnx");
    }

    #[test]
    fn test_last_json_none_on_garbage() {
        assert_eq!(last_json::<Line>("no json here\n"), None);
    }
}
