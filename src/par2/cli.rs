//! CLI-based parity check using the external par2 binary

use super::parser::{parse_repair_output, parse_verify_output};
use super::{ParityCheck, RepairReport, find_main_par2};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Deadline for a verify run
const VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

/// Deadline for a repair run
const REPAIR_TIMEOUT: Duration = Duration::from_secs(600);

/// Parity check shelling out to par2cmdline
///
/// The binary is discovered from PATH at construction; its absence is not
/// an error — [`check`](ParityCheck::check) reports the stage as skipped.
pub struct CliPar2 {
    binary: Option<PathBuf>,
}

impl CliPar2 {
    /// Discover `par2` in PATH
    pub fn new() -> Self {
        let binary = which::which("par2").ok();
        match &binary {
            Some(path) => debug!("Using par2 binary at {}", path.display()),
            None => debug!("No par2 binary in PATH; verification will be skipped"),
        }
        Self { binary }
    }

    /// Use an explicit binary path
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary: Some(binary),
        }
    }

    /// Whether a par2 binary is available
    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn run(
        &self,
        binary: &Path,
        subcommand: &str,
        par2_file: &Path,
        dir: &Path,
        deadline: Duration,
    ) -> Result<Output> {
        let output = timeout(
            deadline,
            Command::new(binary)
                .arg(subcommand)
                .arg(par2_file)
                .current_dir(dir)
                .output(),
        )
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(|e| EngineError::Par2RepairFailed(format!("failed to execute par2: {}", e)))?;

        Ok(output)
    }
}

impl Default for CliPar2 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParityCheck for CliPar2 {
    async fn check(&self, dir: &Path) -> Result<RepairReport> {
        let Some(binary) = self.binary.clone() else {
            return Ok(RepairReport::skipped("skipped"));
        };

        let Some(main_par2) = find_main_par2(dir)? else {
            return Ok(RepairReport::skipped("no PAR2 files present"));
        };

        debug!("Verifying {} with par2", main_par2.display());
        let output = self
            .run(&binary, "v", &main_par2, dir, VERIFY_TIMEOUT)
            .await?;
        let verify = parse_verify_output(&output.stdout, &output.stderr, output.status.success());

        if !verify.needs_repair() {
            return Ok(RepairReport {
                success: true,
                needs_repair: false,
                repaired: false,
                files_damaged: Vec::new(),
                files_missing: Vec::new(),
                message: "verified".to_string(),
            });
        }

        info!(
            "Repair required in {} ({} damaged, {} missing)",
            dir.display(),
            verify.damaged_files.len(),
            verify.missing_files.len()
        );

        let output = self
            .run(&binary, "r", &main_par2, dir, REPAIR_TIMEOUT)
            .await?;
        let repair = parse_repair_output(&output.stdout, &output.stderr, output.status.success());

        if !repair.success {
            warn!(
                "par2 repair failed in {}: {}",
                dir.display(),
                repair.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(RepairReport {
            success: repair.success,
            needs_repair: true,
            repaired: repair.success,
            files_damaged: verify.damaged_files,
            files_missing: verify.missing_files,
            message: if repair.success {
                "repaired".to_string()
            } else {
                repair
                    .error
                    .unwrap_or_else(|| "repair failed".to_string())
            },
        })
    }

    fn name(&self) -> &'static str {
        "cli-par2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts() {
        assert_eq!(VERIFY_TIMEOUT, Duration::from_secs(300));
        assert_eq!(REPAIR_TIMEOUT, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_check_without_binary_skips() {
        let handler = CliPar2 { binary: None };
        let dir = tempfile::tempdir().unwrap();
        let report = handler.check(dir.path()).await.unwrap();
        assert!(report.success);
        assert!(!report.needs_repair);
        assert_eq!(report.message, "skipped");
    }

    #[tokio::test]
    async fn test_check_without_par2_files_skips() {
        let handler = CliPar2::with_binary(PathBuf::from("/usr/bin/par2"));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload.bin"), b"data").unwrap();

        let report = handler.check(dir.path()).await.unwrap();
        assert!(report.success);
        assert!(!report.needs_repair);
    }

    #[tokio::test]
    async fn test_check_with_bogus_binary_errors() {
        let handler = CliPar2::with_binary(PathBuf::from("/nonexistent/par2"));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("set.par2"), b"not a real par2").unwrap();

        let result = handler.check(dir.path()).await;
        assert!(matches!(result, Err(EngineError::Par2RepairFailed(_))));
    }
}
