use tracing::{info, warn};

pub const MIN_PYTHON: (u32, u32) = (3, 8);

/// Packages the export toolchain needs importable before anything else works.
pub const REQUIRED_PACKAGES: [&str; 3] = ["torch", "ultralytics", "onnx"];

#[derive(Debug, Clone)]
pub struct PackageStatus {
    pub name: String,
    pub installed: bool,
    /// Version reported by the package, if it exposes one.
    pub version: Option<String>,
}

impl PackageStatus {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed: false,
            version: None,
        }
    }
}

/// Host package-resolution mechanism: importability, version, installation.
pub trait PackageResolver {
    /// Interpreter (major, minor), if one could be found at all.
    fn python_version(&mut self) -> Option<(u32, u32)>;

    fn resolve(&mut self, name: &str) -> PackageStatus;

    /// Attempt installation. True on success.
    fn install(&mut self, name: &str) -> bool;
}

#[derive(Debug)]
pub struct EnvReport {
    pub python_ok: bool,
    pub python_version: Option<(u32, u32)>,
    pub packages: Vec<PackageStatus>,
}

impl EnvReport {
    /// Ready means the interpreter is adequate and every required package
    /// resolved as installed at check time. Installations attempted during
    /// the same run do not count.
    pub fn is_ready(&self) -> bool {
        self.python_ok && self.packages.iter().all(|p| p.installed)
    }
}

/// Check the interpreter and required packages, optionally attempting to
/// install whatever is missing. `confirm_install` is consulted once, with
/// the missing set, only when something is missing; installation failures
/// are reported and skipped.
pub fn check_environment<R: PackageResolver>(
    resolver: &mut R,
    confirm_install: impl FnOnce(&[String]) -> bool,
) -> EnvReport {
    let python_version = resolver.python_version();
    let python_ok = match python_version {
        Some((major, minor)) => {
            if (major, minor) >= MIN_PYTHON {
                info!("python {major}.{minor} ok");
                true
            } else {
                warn!(
                    "python {major}.{minor} is too old, need {}.{}+",
                    MIN_PYTHON.0, MIN_PYTHON.1
                );
                false
            }
        }
        None => {
            warn!("no usable python interpreter found");
            false
        }
    };

    let packages: Vec<PackageStatus> = REQUIRED_PACKAGES
        .iter()
        .map(|name| {
            let status = resolver.resolve(name);
            if status.installed {
                info!(
                    "{} installed (version: {})",
                    status.name,
                    status.version.as_deref().unwrap_or("unknown")
                );
            } else {
                warn!("{} not installed", status.name);
            }
            status
        })
        .collect();

    let missing: Vec<String> = packages
        .iter()
        .filter(|p| !p.installed)
        .map(|p| p.name.clone())
        .collect();

    if !missing.is_empty() {
        warn!("missing packages: {}", missing.join(", "));
        info!("install manually with: pip install {}", missing.join(" "));
        if confirm_install(&missing) {
            for name in &missing {
                info!("installing {name}...");
                if resolver.install(name) {
                    info!("{name} installed");
                } else {
                    warn!("{name} installation failed, skipping");
                }
            }
        }
    }

    EnvReport {
        python_ok,
        python_version,
        packages,
    }
}
