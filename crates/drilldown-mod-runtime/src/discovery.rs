//! Mod package discovery.
//!
//! A mods directory is scanned one level deep. Every subdirectory is a
//! candidate package and is expected to hold a `mod.toml` or `mod.json`.
//! Candidates are returned in file-name order so that discovery order is
//! stable across platforms and runs.
//!
//! A candidate whose manifest is missing or unreadable is still returned,
//! carrying the error, so the caller can record it without aborting the scan.

use crate::error::{RuntimeError, RuntimeResult};
use crate::manifest::ModManifest;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A package whose manifest has been read.
#[derive(Debug, Clone)]
pub struct PackagePath {
    /// Path to the package directory.
    pub path: PathBuf,

    /// Parsed manifest.
    pub manifest: ModManifest,
}

impl PackagePath {
    /// Get the mod ID.
    pub fn id(&self) -> &str {
        self.manifest.id()
    }

    /// Name of the package directory.
    pub fn dir_name(&self) -> String {
        dir_name(&self.path)
    }

    /// Name of the code unit holding this package's code.
    pub fn code_unit(&self) -> String {
        self.manifest
            .module
            .code
            .clone()
            .unwrap_or_else(|| self.dir_name())
    }
}

/// A package found during a scan, with its manifest or the reason it could
/// not be read.
#[derive(Debug)]
pub struct PackageCandidate {
    pub path: PathBuf,
    pub manifest: RuntimeResult<ModManifest>,
}

impl PackageCandidate {
    /// Split into a readable package or the discovery error.
    pub fn into_package(self) -> Result<PackagePath, (PathBuf, RuntimeError)> {
        match self.manifest {
            Ok(manifest) => Ok(PackagePath {
                path: self.path,
                manifest,
            }),
            Err(e) => Err((self.path, e)),
        }
    }
}

/// Get the per-user mods directory.
pub fn user_mods_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("de", "dakror", "drilldown")
        .map(|dirs| dirs.data_dir().join("mods"))
}

/// Scan a mods directory for candidate packages.
///
/// A missing directory is created and yields no candidates.
pub fn discover_packages(dir: &Path) -> RuntimeResult<Vec<PackageCandidate>> {
    if !dir.exists() {
        info!("Creating mods directory {:?}", dir);
        std::fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("Failed to read entry in mods directory {:?}: {}", dir, e);
                continue;
            }
        };

        if path.is_dir() {
            dirs.push(path);
        } else {
            debug!("Skipping {:?}: not a package directory", path);
        }
    }
    dirs.sort();

    let candidates: Vec<PackageCandidate> = dirs
        .into_iter()
        .map(|path| {
            let manifest = ModManifest::from_package(&path);
            match &manifest {
                Ok(m) => debug!("Discovered package {} at {:?}", m.id(), path),
                Err(e) => warn!("Failed to read manifest in {:?}: {}", path, e),
            }
            PackageCandidate { path, manifest }
        })
        .collect();

    info!("Discovered {} mod package(s) in {:?}", candidates.len(), dir);
    Ok(candidates)
}

/// Read a single package from a path.
pub fn discover_package(path: &Path) -> RuntimeResult<PackagePath> {
    if !path.is_dir() {
        return Err(RuntimeError::PackageNotFound(path.display().to_string()));
    }

    let manifest = ModManifest::from_package(path)?;
    Ok(PackagePath {
        path: path.to_path_buf(),
        manifest,
    })
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
