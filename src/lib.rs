#![doc = include_str!("../README.md")]

/// Out-of-order file assembly from decoded segments
pub mod assembler;
mod config;
/// NNTP connection state machine
pub mod connection;
mod engine;
mod error;
/// Engine event channel
pub mod events;
/// Archive extraction contract and archive discovery
pub mod extract;
/// Provider fallback routing and retry accounting
pub mod fallback;
mod job;
/// NZB manifest parser
pub mod nzb;
/// PAR2 verification and repair via an external tool
pub mod par2;
/// Per-provider connection pooling
pub mod pool;
mod response;
/// Per-segment download loop
pub mod segment;
/// Network transport abstraction
pub mod transport;
/// yEnc binary decoding
pub mod yenc;

pub use config::{EngineConfig, ProviderConfig};
pub use connection::NntpConnection;
pub use engine::DownloadEngine;
pub use error::{EngineError, Result};
pub use events::{Event, EventChannel};
pub use extract::{ArchiveExtractor, find_first_archive};
pub use fallback::{FallbackManager, ProviderStats};
pub use job::{DownloadJob, FileProgress, JobId, JobStatus};
pub use nzb::{Nzb, NzbFile, NzbSegment, parse_nzb};
pub use par2::{CliPar2, ParityCheck, RepairReport};
pub use pool::{ConnectionPool, PoolRegistry};
pub use response::{NntpStatus, codes};
pub use segment::{FetchMode, SegmentDownloader};
pub use transport::{TcpTransport, Transport, TransportStream};
pub use yenc::{
    CrcState, DecodedSegment, SegmentData, StreamingDecoder, YencHeader, YencPart, YencTrailer,
    decode as yenc_decode,
};
