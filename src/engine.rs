//! Download job orchestrator
//!
//! [`DownloadEngine`] owns the whole pipeline for each job: NZB parsing,
//! concurrent segment fan-out bounded by provider capacity, progress
//! accounting, assembly, PAR2 verify/repair, optional extraction, and the
//! pause/resume/delete controls. Counter updates are single-writer: worker
//! tasks return results to the fan-out loop, which is the only place job
//! state mutates during the download phase.

use crate::assembler;
use crate::config::{EngineConfig, ProviderConfig};
use crate::error::{EngineError, Result};
use crate::events::{Event, EventChannel};
use crate::extract::{self, ArchiveExtractor};
use crate::fallback::{FallbackManager, ProviderStats};
use crate::job::{DownloadJob, FileProgress, JobId, JobStatus};
use crate::nzb::{self, NzbFile, NzbSegment};
use crate::par2::{CliPar2, ParityCheck};
use crate::pool::PoolRegistry;
use crate::segment::SegmentDownloader;
use crate::transport::{TcpTransport, Transport};
use crate::yenc::DecodedSegment;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scratch subdirectory holding per-segment files during download
const SCRATCH_DIR: &str = ".segments";

/// Everything the fan-out produced for one job
struct DownloadedFiles {
    /// Decoded segments per file, keyed by segment number
    per_file: Vec<BTreeMap<u32, DecodedSegment>>,
    /// Message-ids that exhausted every provider
    failed: Vec<String>,
}

/// Shared state for one registered job
struct JobHandle {
    job: Mutex<DownloadJob>,
    /// Pause gate: workers hold while the value is `true`
    pause: watch::Sender<bool>,
    cancel: CancellationToken,
    pools: Arc<PoolRegistry>,
    fallback: Arc<FallbackManager>,
    last_progress: Mutex<Option<Instant>>,
}

impl JobHandle {
    fn lock_job(&self) -> MutexGuard<'_, DownloadJob> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The Usenet download engine
///
/// # Example
///
/// ```no_run
/// use nzb_engine::{DownloadEngine, EngineConfig, ProviderConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let primary = ProviderConfig::tls("primary", "news.example.com", "user", "pass");
/// let engine = Arc::new(DownloadEngine::new(
///     EngineConfig::new("/downloads"),
///     vec![Arc::new(primary)],
/// )?);
///
/// let mut events = engine.subscribe();
/// let id = engine.add_nzb(&std::fs::read_to_string("linux.nzb")?, "linux.nzb").await?;
/// while let Ok(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DownloadEngine {
    config: EngineConfig,
    /// Known providers; the first is primary
    providers: Vec<Arc<ProviderConfig>>,
    transport: Arc<dyn Transport>,
    parity: Arc<dyn ParityCheck>,
    extractor: Option<Arc<dyn ArchiveExtractor>>,
    events: EventChannel,
    jobs: Mutex<HashMap<JobId, Arc<JobHandle>>>,
    next_id: AtomicU64,
}

impl DownloadEngine {
    /// Create an engine with the default transport and PAR2 adapter
    ///
    /// The first provider is primary; its `fallback_provider_ids` select
    /// and order the others.
    pub fn new(config: EngineConfig, providers: Vec<Arc<ProviderConfig>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(EngineError::ConnectionFailed(
                "no providers configured".to_string(),
            ));
        }

        Ok(Self {
            config,
            providers,
            transport: Arc::new(TcpTransport::new()),
            parity: Arc::new(CliPar2::new()),
            extractor: None,
            events: EventChannel::new(),
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Substitute the network transport (tests, platform adapters)
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Substitute the PAR2 adapter
    pub fn with_parity(mut self, parity: Arc<dyn ParityCheck>) -> Self {
        self.parity = parity;
        self
    }

    /// Wire in an archive extractor for auto-extract
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Subscribe to job lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Register an NZB and start downloading it
    ///
    /// `nzb_filename` names the job: its `.nzb` suffix is stripped and the
    /// job saves under `<download_path>/<job_name>/`. PAR2 entries in the
    /// manifest are skipped; repair happens after assembly from whatever
    /// recovery files the save directory holds.
    pub async fn add_nzb(self: &Arc<Self>, nzb_xml: &str, nzb_filename: &str) -> Result<JobId> {
        let manifest = nzb::parse_nzb(nzb_xml)?;

        let files: Vec<Arc<NzbFile>> = manifest
            .files
            .into_iter()
            .filter(|f| !f.is_par2())
            .map(Arc::new)
            .collect();

        if files.is_empty() {
            return Err(EngineError::InvalidNzb(
                "manifest holds only PAR2 files".to_string(),
            ));
        }

        let name = job_name(nzb_filename);
        let save_root = self.providers[0]
            .download_path
            .clone()
            .unwrap_or_else(|| self.config.download_path.clone());
        let save_path = save_root.join(&name);

        tokio::fs::create_dir_all(save_path.join(SCRATCH_DIR)).await?;

        let total_bytes: u64 = files.iter().map(|f| f.total_bytes()).sum();
        let total_segments: usize = files.iter().map(|f| f.segments.len()).sum();
        let file_progress = files
            .iter()
            .map(|f| FileProgress {
                downloaded_segments: 0,
                total_segments: f.segments.len(),
            })
            .collect();

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = DownloadJob {
            id,
            name: name.clone(),
            save_path,
            files,
            total_bytes,
            total_segments,
            status: JobStatus::Queued,
            downloaded_bytes: 0,
            file_progress,
            started_at: Instant::now(),
            auto_extract: self.config.auto_extract,
        };

        info!(
            "Queued {} ({} files, {} segments, {} bytes)",
            id, job.files.len(), total_segments, total_bytes
        );

        let (pause_tx, _) = watch::channel(false);
        let handle = Arc::new(JobHandle {
            job: Mutex::new(job),
            pause: pause_tx,
            cancel: CancellationToken::new(),
            pools: PoolRegistry::new(self.transport.clone()),
            fallback: FallbackManager::new(self.fallback_order()),
            last_progress: Mutex::new(None),
        });

        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handle.clone());

        let engine = self.clone();
        tokio::spawn(async move { engine.run_job(handle).await });

        Ok(id)
    }

    /// Pause a downloading job
    ///
    /// Workers hold at their next polling point; in-flight segments finish
    /// but no new ones start and no progress events are emitted. Pausing a
    /// paused job is a no-op, as is pausing in any other state.
    pub fn pause(&self, id: JobId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut job = handle.lock_job();
        match job.status {
            JobStatus::Downloading => {
                job.status = JobStatus::Paused;
                handle.pause.send_replace(true);
                debug!("{} paused", id);
            }
            JobStatus::Paused => {}
            other => debug!("{} pause ignored in state {:?}", id, other),
        }
        Ok(())
    }

    /// Resume a paused job; wakes waiting workers immediately
    pub fn resume(&self, id: JobId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut job = handle.lock_job();
        if job.status == JobStatus::Paused {
            job.status = JobStatus::Downloading;
            handle.pause.send_replace(false);
            debug!("{} resumed", id);
        }
        Ok(())
    }

    /// Cancel a job, or drop a finished one from the registry
    ///
    /// A non-terminal job transitions to `Cancelled`: in-flight segment
    /// tasks abort at their next suspension point, their results are
    /// discarded, and scratch cleanup still runs. No further progress
    /// events are emitted.
    pub fn delete(&self, id: JobId) -> Result<()> {
        let handle = self.handle(id)?;

        if handle.lock_job().status.is_terminal() {
            self.jobs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Ok(());
        }

        info!("{} cancelled", id);
        handle.cancel.cancel();
        // Unblock anyone held at the pause gate
        handle.pause.send_replace(false);
        Ok(())
    }

    /// Current status of a job
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).map(|h| h.lock_job().status)
    }

    /// Decoded bytes accumulated so far for a job
    pub fn downloaded_bytes(&self, id: JobId) -> Option<u64> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).map(|h| h.lock_job().downloaded_bytes)
    }

    /// Per-provider statistics for a job
    pub fn provider_stats(&self, id: JobId) -> Option<HashMap<String, ProviderStats>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).map(|h| h.fallback.stats())
    }

    /// Provider that delivered a segment, once it completed
    pub fn segment_provider(&self, id: JobId, message_id: &str) -> Option<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id).and_then(|h| h.fallback.succeeded_on(message_id))
    }

    fn handle(&self, id: JobId) -> Result<Arc<JobHandle>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownJob(id.to_string()))
    }

    /// Provider order for new jobs: primary, then its configured fallbacks
    fn fallback_order(&self) -> Vec<Arc<ProviderConfig>> {
        let primary = &self.providers[0];
        let mut order = vec![primary.clone()];
        for fallback_id in &primary.fallback_provider_ids {
            match self.providers.iter().find(|p| &p.id == fallback_id) {
                Some(provider) => order.push(provider.clone()),
                None => warn!("Unknown fallback provider id: {}", fallback_id),
            }
        }
        order
    }

    /// Run one job to a terminal state
    async fn run_job(self: Arc<Self>, handle: Arc<JobHandle>) {
        let (id, scratch_dir) = {
            let job = handle.lock_job();
            (job.id, job.save_path.join(SCRATCH_DIR))
        };

        let outcome = self.execute(&handle, &scratch_dir).await;

        // Scratch cleanup runs on every exit path
        if let Err(e) = assembler::remove_scratch_dir(&scratch_dir).await {
            warn!("{} scratch cleanup failed: {}", id, e);
        }

        match outcome {
            Ok(()) => {
                let (name, save_path, total_bytes) = {
                    let mut job = handle.lock_job();
                    job.status = JobStatus::Completed;
                    (job.name.clone(), job.save_path.clone(), job.downloaded_bytes)
                };
                info!("{} completed ({} bytes)", id, total_bytes);
                self.events.emit(Event::Completed {
                    id,
                    filename: name,
                    save_path,
                    end_time: SystemTime::now(),
                    total_bytes,
                });
            }
            Err(EngineError::Cancelled) => {
                handle.lock_job().status = JobStatus::Cancelled;
                debug!("{} reached cancelled", id);
            }
            Err(e) => {
                handle.lock_job().status = JobStatus::Failed;
                warn!("{} failed: {}", id, e);
                self.events.emit(Event::Failed {
                    id,
                    reason: e.to_string(),
                });
            }
        }

        handle.pools.shutdown_all();
    }

    /// Download, assemble, repair, extract
    async fn execute(&self, handle: &Arc<JobHandle>, scratch_dir: &Path) -> Result<()> {
        self.set_status(handle, JobStatus::Downloading);

        let downloaded = self.download_phase(handle, scratch_dir).await?;

        if !downloaded.failed.is_empty() {
            return Err(EngineError::AllProvidersExhausted(
                downloaded.failed.join(", "),
            ));
        }

        self.set_status(handle, JobStatus::Assembling);
        let (save_path, files) = {
            let job = handle.lock_job();
            (job.save_path.clone(), job.files.clone())
        };

        for (idx, segments) in downloaded.per_file.into_iter().enumerate() {
            let output = save_path.join(&files[idx].filename);
            let written = assembler::assemble_file(&output, segments).await?;
            debug!("Assembled {} ({} bytes)", output.display(), written);
        }

        self.set_status(handle, JobStatus::Repairing);
        let report = self.parity.check(&save_path).await?;
        if !report.success {
            return Err(EngineError::Par2RepairFailed(report.message));
        }
        debug!("PAR2 stage: {}", report.message);

        let auto_extract = handle.lock_job().auto_extract;
        if auto_extract && let Some(extractor) = &self.extractor {
            self.set_status(handle, JobStatus::Extracting);
            if let Some(archive) = extract::find_first_archive(&save_path)
                .map_err(|e| EngineError::ExtractionFailed(e.to_string()))?
            {
                info!("Extracting {} with {}", archive.display(), extractor.name());
                extractor
                    .extract(&archive, &save_path)
                    .await
                    .map_err(|e| EngineError::ExtractionFailed(e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Concurrent segment fan-out
    ///
    /// Keeps up to `bound` segment tasks in flight, topping up whenever one
    /// completes. The loop is the single writer of job counters. Pause is
    /// honored before starting new work; cancellation aborts in-flight
    /// tasks and discards their results.
    async fn download_phase(
        &self,
        handle: &Arc<JobHandle>,
        scratch_dir: &Path,
    ) -> Result<DownloadedFiles> {
        let (files, bound) = {
            let job = handle.lock_job();
            let bound = self
                .config
                .segment_concurrency
                .unwrap_or(self.providers[0].max_connections)
                .max(1);
            (job.files.clone(), bound)
        };

        // Eagerly open a couple of primary connections; failures here are
        // tolerated, the dispatch path connects lazily anyway
        if let Some(primary) = handle.fallback.primary() {
            let pool = handle.pools.get_or_create(primary);
            if let Err(e) = pool.warm_up().await {
                debug!("Pool warm-up failed: {}", e);
            }
        }

        let downloader = Arc::new(SegmentDownloader::new(
            handle.fallback.clone(),
            handle.pools.clone(),
        ));

        // Flatten to (file, segment) preserving file-then-segment order
        let work: Vec<(usize, Arc<NzbFile>, NzbSegment)> = files
            .iter()
            .enumerate()
            .flat_map(|(idx, file)| {
                file.segments
                    .iter()
                    .map(move |segment| (idx, file.clone(), segment.clone()))
            })
            .collect();

        let mut per_file: Vec<BTreeMap<u32, DecodedSegment>> =
            files.iter().map(|_| BTreeMap::new()).collect();
        let mut failed: Vec<String> = Vec::new();

        let mut pause_rx = handle.pause.subscribe();
        let mut work_iter = work.into_iter();
        let mut in_flight: JoinSet<(usize, u32, String, Result<DecodedSegment>)> = JoinSet::new();

        loop {
            // Hold while paused; cancellation lands here too
            while *pause_rx.borrow_and_update() {
                tokio::select! {
                    _ = handle.cancel.cancelled() => {
                        abort_and_drain(&mut in_flight).await;
                        return Err(EngineError::Cancelled);
                    }
                    changed = pause_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            // Top up to the concurrency bound
            while in_flight.len() < bound {
                let Some((file_idx, file, segment)) = work_iter.next() else {
                    break;
                };
                let downloader = downloader.clone();
                let scratch = scratch_dir.to_path_buf();
                let cancel = handle.cancel.clone();
                in_flight.spawn(async move {
                    let result = downloader.download(&file, &segment, &scratch, &cancel).await;
                    (file_idx, segment.number, segment.message_id.clone(), result)
                });
            }

            // Race the in-flight set against cancellation
            let joined = tokio::select! {
                _ = handle.cancel.cancelled() => {
                    abort_and_drain(&mut in_flight).await;
                    return Err(EngineError::Cancelled);
                }
                joined = in_flight.join_next() => joined,
            };

            let Some(joined) = joined else {
                // Nothing in flight and nothing left to start
                break;
            };

            match joined {
                Ok((file_idx, number, message_id, result)) => {
                    self.apply_segment_result(
                        handle,
                        &mut per_file,
                        &mut failed,
                        file_idx,
                        number,
                        message_id,
                        result,
                    );
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Segment task join error: {}", e),
            }
        }

        Ok(DownloadedFiles { per_file, failed })
    }

    /// Record one finished segment: counters, progress event, failure set
    #[allow(clippy::too_many_arguments)]
    fn apply_segment_result(
        &self,
        handle: &Arc<JobHandle>,
        per_file: &mut [BTreeMap<u32, DecodedSegment>],
        failed: &mut Vec<String>,
        file_idx: usize,
        number: u32,
        message_id: String,
        result: Result<DecodedSegment>,
    ) {
        // A completion racing the cancellation is discarded
        if handle.cancel.is_cancelled() {
            return;
        }

        match result {
            Ok(decoded) => {
                {
                    let mut job = handle.lock_job();
                    job.downloaded_bytes += decoded.data.len();
                    if let Some(progress) = job.file_progress.get_mut(file_idx) {
                        progress.downloaded_segments += 1;
                    }
                }
                per_file[file_idx].insert(number, decoded);
                self.emit_progress(handle, false);
            }
            Err(EngineError::Cancelled) => {}
            Err(e) => {
                warn!("Segment {} permanently failed: {}", message_id, e);
                failed.push(message_id);
            }
        }
    }

    /// Transition status and emit an (unthrottled) progress event
    fn set_status(&self, handle: &Arc<JobHandle>, status: JobStatus) {
        handle.lock_job().status = status;
        self.emit_progress(handle, true);
    }

    /// Emit a progress event, throttled unless `force`
    ///
    /// Nothing is emitted while the job is paused or already terminal
    /// through the throttled path.
    fn emit_progress(&self, handle: &Arc<JobHandle>, force: bool) {
        if !force {
            let job = handle.lock_job();
            if job.status != JobStatus::Downloading {
                return;
            }
            drop(job);

            let mut last = handle
                .last_progress
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last
                && at.elapsed() < self.config.progress_interval()
            {
                return;
            }
            *last = Some(Instant::now());
        }

        let event = {
            let job = handle.lock_job();
            Event::Progress {
                id: job.id,
                filename: job.name.clone(),
                transferred_bytes: job.downloaded_bytes,
                total_bytes: job.total_bytes,
                percent: job.progress(),
                speed_bps: job.speed_bps(),
                eta_secs: job.eta().map(|d| d.as_secs()),
                status: job.status,
                provider: self.providers[0].id.clone(),
                path: job.save_path.clone(),
            }
        };
        self.events.emit(event);
    }
}

/// Strip the `.nzb` suffix to name the job
fn job_name(nzb_filename: &str) -> String {
    let name = nzb_filename.rsplit('/').next().unwrap_or(nzb_filename);
    name.strip_suffix(".nzb")
        .or_else(|| name.strip_suffix(".NZB"))
        .unwrap_or(name)
        .to_string()
}

/// Abort all in-flight tasks and wait for them to wind down
///
/// Waiting matters: scratch cleanup follows, and aborted tasks must not
/// race it with in-progress writes.
async fn abort_and_drain<T: 'static>(set: &mut JoinSet<T>) {
    set.abort_all();
    while set.join_next().await.is_some() {}
}
