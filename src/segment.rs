//! Per-segment download loop: retries, backoff, provider fallback
//!
//! One [`SegmentDownloader`] drives a segment from its first attempt on the
//! primary provider to either a [`DecodedSegment`] or
//! [`EngineError::AllProvidersExhausted`]. The wire fetch goes through the
//! pool for whichever provider is current; decoding streams into a
//! per-segment scratch file (or into memory on the buffered path).

use crate::error::{EngineError, Result};
use crate::fallback::FallbackManager;
use crate::nzb::{NzbFile, NzbSegment};
use crate::pool::{ConnectionPool, PoolRegistry};
use crate::yenc::{self, DecodedSegment, SegmentData, StreamingDecoder};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default deadline for a streamed body to produce its =yend
const STREAM_DECODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff doublings are capped so the shift cannot overflow
const MAX_BACKOFF_SHIFT: u32 = 16;

/// How a segment's body is fetched and decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Whole body in memory, batch decode
    Buffered,
    /// Body lines streamed into a scratch file as they arrive
    Streamed,
}

/// Drives one segment at a time through retries and provider switches
pub struct SegmentDownloader {
    fallback: Arc<FallbackManager>,
    pools: Arc<PoolRegistry>,
    stream_timeout: Duration,
}

impl SegmentDownloader {
    /// Create a downloader routing through the given fallback order and
    /// pool registry
    pub fn new(fallback: Arc<FallbackManager>, pools: Arc<PoolRegistry>) -> Self {
        Self {
            fallback,
            pools,
            stream_timeout: STREAM_DECODE_TIMEOUT,
        }
    }

    /// Override the streaming decode deadline (default 30 s)
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Download a segment, streaming decoded bytes to
    /// `<scratch_dir>/<filename>.<number>.tmp`
    pub async fn download(
        &self,
        file: &NzbFile,
        segment: &NzbSegment,
        scratch_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DecodedSegment> {
        self.run(file, segment, FetchMode::Streamed, scratch_dir, cancel)
            .await
    }

    /// Download a segment fully in memory (small articles)
    pub async fn download_buffered(
        &self,
        file: &NzbFile,
        segment: &NzbSegment,
        cancel: &CancellationToken,
    ) -> Result<DecodedSegment> {
        self.run(file, segment, FetchMode::Buffered, Path::new(""), cancel)
            .await
    }

    async fn run(
        &self,
        file: &NzbFile,
        segment: &NzbSegment,
        mode: FetchMode,
        scratch_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DecodedSegment> {
        let mid = segment.message_id.as_str();
        let mut current = self
            .fallback
            .pin_current(mid)
            .ok_or_else(|| EngineError::AllProvidersExhausted(mid.to_string()))?;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if !self.fallback.should_retry(mid, &current) {
                match self.fallback.next_provider(mid, &current) {
                    Some(next) => {
                        debug!(
                            "Segment {} falling back from {} to {}",
                            segment.number, current.id, next.id
                        );
                        current = next;
                        continue;
                    }
                    None => {
                        return Err(EngineError::AllProvidersExhausted(mid.to_string()));
                    }
                }
            }

            let pool = self.pools.get_or_create(&current);
            let attempt = async {
                match mode {
                    FetchMode::Streamed => {
                        self.attempt_streamed(&pool, file, segment, scratch_dir).await
                    }
                    FetchMode::Buffered => self.attempt_buffered(&pool, file, segment).await,
                }
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(decoded) => {
                    self.fallback.record_success(mid, &current);
                    return Ok(decoded);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    self.fallback.record_failure(mid, &current);
                    let failures = self.fallback.failure_count(mid, &current);
                    warn!(
                        "Segment {} attempt {} on {} failed: {}",
                        segment.number, failures, current.id, e
                    );

                    if self.fallback.should_retry(mid, &current) {
                        let backoff = backoff_delay(current.retry_backoff_ms, failures);
                        // 0-50% jitter keeps simultaneous retries from
                        // hitting the server in lockstep
                        let jitter = Duration::from_millis(
                            rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2),
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                            _ = tokio::time::sleep(backoff + jitter) => {}
                        }
                    }
                    // Retries exhausted: the loop head advances the provider
                }
            }
        }
    }

    async fn attempt_buffered(
        &self,
        pool: &Arc<ConnectionPool>,
        file: &NzbFile,
        segment: &NzbSegment,
    ) -> Result<DecodedSegment> {
        let body = pool
            .fetch_body(&segment.message_id, file.primary_group())
            .await?;

        let decoded = yenc::decode(&body)?;
        if decoded.data.is_empty() {
            return Err(EngineError::EmptyBody(segment.message_id.clone()));
        }
        log_crc(&decoded.crc, segment);
        Ok(decoded)
    }

    async fn attempt_streamed(
        &self,
        pool: &Arc<ConnectionPool>,
        file: &NzbFile,
        segment: &NzbSegment,
        scratch_dir: &Path,
    ) -> Result<DecodedSegment> {
        let scratch_path = scratch_path(scratch_dir, file, segment);

        let result = self
            .stream_to_scratch(pool, file, segment, &scratch_path)
            .await;

        if result.is_err() {
            // Partial scratch data is useless; a retry rewrites the file
            let _ = tokio::fs::remove_file(&scratch_path).await;
        }
        result
    }

    async fn stream_to_scratch(
        &self,
        pool: &Arc<ConnectionPool>,
        file: &NzbFile,
        segment: &NzbSegment,
        scratch_path: &Path,
    ) -> Result<DecodedSegment> {
        let mut rx = pool
            .fetch_body_streamed(
                &segment.message_id,
                file.primary_group().map(String::from),
            )
            .await?;

        let out = tokio::fs::File::create(scratch_path).await?;
        let mut decoder = StreamingDecoder::new(BufWriter::new(out));

        let consume = async {
            while let Some(item) = rx.recv().await {
                let line = item?;
                if decoder.feed_line(&line).await? {
                    return Ok(());
                }
            }
            // Channel closed without a trailer: the body ended early
            Err(EngineError::InvalidYenc(
                "article ended before =yend".to_string(),
            ))
        };

        tokio::time::timeout(self.stream_timeout, consume)
            .await
            .map_err(|_| EngineError::Timeout)??;

        let (outcome, mut writer) = decoder.finish()?;
        writer.flush().await?;
        drop(writer);

        if outcome.decoded_len == 0 {
            return Err(EngineError::EmptyBody(segment.message_id.clone()));
        }
        log_crc(&outcome.crc, segment);

        Ok(DecodedSegment {
            header: outcome.header,
            part: outcome.part,
            trailer: outcome.trailer,
            data: SegmentData::Scratch {
                path: scratch_path.to_path_buf(),
                len: outcome.decoded_len,
            },
            computed_crc32: outcome.computed_crc32,
            crc: outcome.crc,
        })
    }
}

/// Scratch file path for a segment: `<dir>/<filename>.<number>.tmp`
pub fn scratch_path(scratch_dir: &Path, file: &NzbFile, segment: &NzbSegment) -> PathBuf {
    scratch_dir.join(format!("{}.{}.tmp", file.filename, segment.number))
}

/// Exponential backoff before the k-th retry: `base * 2^(k-1)`
fn backoff_delay(base_ms: u64, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    Duration::from_millis(base_ms.saturating_mul(1u64 << shift))
}

fn log_crc(crc: &yenc::CrcState, segment: &NzbSegment) {
    if *crc == yenc::CrcState::Mismatched {
        // Not fatal: PAR2 repair recovers damaged segments after assembly
        warn!(
            "Segment {} CRC mismatch ({})",
            segment.number, segment.message_id
        );
    }
}
