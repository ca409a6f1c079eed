//! Parser for par2cmdline output

/// What a `par2 v` run said about the set
#[derive(Debug, Clone, Default)]
pub(super) struct VerifySummary {
    /// All files verified intact
    pub complete: bool,
    /// Files reported damaged
    pub damaged_files: Vec<String>,
    /// Files reported missing
    pub missing_files: Vec<String>,
    /// Whether the tool believes repair is possible
    pub repair_possible: bool,
}

impl VerifySummary {
    pub fn needs_repair(&self) -> bool {
        !self.complete
    }
}

/// Parse output from `par2 v`
///
/// par2cmdline reports per-target status lines
/// (`Target: "file.bin" - damaged.` / `- missing.` / `- found.`) and a
/// closing verdict (`All files are correct...` or `Repair is required.`).
pub(super) fn parse_verify_output(stdout: &[u8], stderr: &[u8], exit_ok: bool) -> VerifySummary {
    let combined = combine(stdout, stderr);

    let mut summary = VerifySummary::default();
    let mut verdict_complete = None;

    for line in combined.lines() {
        let lower = line.to_lowercase();

        if lower.contains("all files are correct") || lower.contains("repair is not required") {
            verdict_complete = Some(true);
        } else if lower.contains("repair is required") {
            verdict_complete = Some(false);
        }

        if lower.contains("repair is possible") {
            summary.repair_possible = true;
        }

        if lower.contains("- damaged")
            && let Some(filename) = quoted_filename(line)
            && !summary.damaged_files.contains(&filename)
        {
            summary.damaged_files.push(filename);
        }

        if lower.contains("- missing")
            && let Some(filename) = quoted_filename(line)
            && !summary.missing_files.contains(&filename)
        {
            summary.missing_files.push(filename);
        }
    }

    summary.complete = verdict_complete.unwrap_or_else(|| {
        exit_ok && summary.damaged_files.is_empty() && summary.missing_files.is_empty()
    });

    summary
}

/// What a `par2 r` run achieved
#[derive(Debug, Clone)]
pub(super) struct RepairSummary {
    /// Repair completed and files verify
    pub success: bool,
    /// First error line, when the repair failed
    pub error: Option<String>,
}

/// Parse output from `par2 r`
pub(super) fn parse_repair_output(stdout: &[u8], stderr: &[u8], exit_ok: bool) -> RepairSummary {
    let combined = combine(stdout, stderr);

    let mut complete = false;
    let mut error = None;

    for line in combined.lines() {
        let lower = line.to_lowercase();
        if lower.contains("repair complete") {
            complete = true;
        }
        if (lower.contains("repair failed") || lower.contains("not possible")) && error.is_none() {
            error = Some(line.trim().to_string());
        }
    }

    let success = exit_ok && (complete || error.is_none());
    if !success && error.is_none() {
        error = Some("par2 exited with an error".to_string());
    }

    RepairSummary {
        success,
        error: if success { None } else { error },
    }
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    )
}

/// Extract the file name from a `Target: "name" - status.` line
fn quoted_filename(line: &str) -> Option<String> {
    let open = line.find('"')?;
    let close = line[open + 1..].find('"')?;
    let name = &line[open + 1..open + 1 + close];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
