//! PAR2 verification and repair via an external tool
//!
//! The engine does not implement Reed-Solomon itself: after assembly it
//! hands the save directory to a [`ParityCheck`] implementation. The
//! default [`CliPar2`] shells out to `par2` (par2cmdline); a missing
//! binary or missing recovery files skip the stage rather than fail it.
//!
//! Reference: [Parity Volume Set Specification 2.0](https://parchive.sourceforge.net/docs/specifications/parity-volume-spec/article-spec.html)

mod cli;
mod parser;

pub use cli::CliPar2;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Outcome of the verify/repair stage for one job
#[must_use]
#[derive(Debug, Clone)]
pub struct RepairReport {
    /// Whether the stage ended with intact files (repaired or never damaged)
    pub success: bool,
    /// Whether verification found damage or missing files
    pub needs_repair: bool,
    /// Whether a repair ran and completed
    pub repaired: bool,
    /// Files reported damaged by verification
    pub files_damaged: Vec<String>,
    /// Files reported missing by verification
    pub files_missing: Vec<String>,
    /// Human-readable summary ("skipped", "verified", "repaired", ...)
    pub message: String,
}

impl RepairReport {
    /// Report for a skipped stage (no tool or no recovery files)
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: true,
            needs_repair: false,
            repaired: false,
            files_damaged: Vec::new(),
            files_missing: Vec::new(),
            message: message.into(),
        }
    }
}

/// Contract for PAR2 verification and repair over a directory
#[async_trait]
pub trait ParityCheck: Send + Sync {
    /// Verify the files in `dir` and repair them if needed
    async fn check(&self, dir: &Path) -> Result<RepairReport>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Locate the PAR2 set's main file in a directory
///
/// Recovery sets ship one index file (`name.par2`) plus volume files
/// (`name.vol000+01.par2`, ...). The index is preferred; any `.par2` file
/// works as a fallback since par2cmdline resolves the set from it.
pub fn find_main_par2(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut volumes = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_ascii_lowercase(),
            None => continue,
        };
        if !name.ends_with(".par2") {
            continue;
        }
        if name.contains(".vol") {
            volumes.push(path);
        } else {
            return Ok(Some(path));
        }
    }

    volumes.sort();
    Ok(volumes.into_iter().next())
}
