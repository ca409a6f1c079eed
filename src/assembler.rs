//! Out-of-order file assembly
//!
//! Segments arrive in whatever order the pool completes them; assembly is
//! deterministic because segments are written in ascending segment-number
//! order at offsets taken from their yEnc part headers (falling back to a
//! running offset when a header carries none). Scratch files are consumed
//! and removed as they are written out.

use crate::error::{EngineError, Result};
use crate::yenc::{DecodedSegment, SegmentData};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

/// Assemble one output file from its decoded segments
///
/// `segments` maps segment number to decoded segment; missing numbers are
/// skipped (the orchestrator fails the job before assembly when a segment
/// is genuinely lost, so a gap here means PAR2 data will fill it). When
/// two segments claim overlapping offsets, the later-numbered segment wins
/// because writes happen in ascending number order.
pub async fn assemble_file(
    output_path: &Path,
    segments: BTreeMap<u32, DecodedSegment>,
) -> Result<u64> {
    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output_path)
        .await
        .map_err(|e| assembly_error(output_path, "open output", &e))?;

    let mut running_offset = 0u64;
    let mut written_total = 0u64;

    for (number, segment) in segments {
        let offset = segment.file_offset().unwrap_or(running_offset);
        let len = segment.data.len();

        output
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| assembly_error(output_path, "seek", &e))?;

        match segment.data {
            SegmentData::Buffered(bytes) => {
                output
                    .write_all(&bytes)
                    .await
                    .map_err(|e| assembly_error(output_path, "write", &e))?;
            }
            SegmentData::Scratch { ref path, .. } => {
                copy_scratch(path, &mut output)
                    .await
                    .map_err(|e| assembly_error(output_path, "copy scratch", &e))?;
                // Consumed; retries never reuse old scratch data
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Failed to remove scratch file {}: {}", path.display(), e);
                }
            }
        }

        debug!(
            "Wrote segment {} at offset {} ({} bytes)",
            number, offset, len
        );
        running_offset = running_offset.max(offset + len);
        written_total += len;
    }

    output
        .flush()
        .await
        .map_err(|e| assembly_error(output_path, "flush", &e))?;

    Ok(written_total)
}

async fn copy_scratch(scratch: &Path, output: &mut File) -> std::io::Result<()> {
    let mut input = File::open(scratch).await?;
    tokio::io::copy(&mut input, output).await?;
    Ok(())
}

/// Remove the scratch directory once assembly has emptied it
///
/// Leftover entries (failed-segment scratch, stray files) are removed
/// first: cleanup is deterministic on every exit path, not best-effort.
pub async fn remove_scratch_dir(scratch_dir: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(scratch_dir).await {
        Ok(entries) => entries,
        // Already gone
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(assembly_error(scratch_dir, "read scratch dir", &e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| assembly_error(scratch_dir, "walk scratch dir", &e))?
    {
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            warn!(
                "Failed to remove scratch entry {}: {}",
                entry.path().display(),
                e
            );
        }
    }

    tokio::fs::remove_dir(scratch_dir)
        .await
        .map_err(|e| assembly_error(scratch_dir, "remove scratch dir", &e))
}

fn assembly_error(path: &Path, action: &str, error: &std::io::Error) -> EngineError {
    EngineError::AssemblyIo(format!("{} {}: {}", action, path.display(), error))
}
