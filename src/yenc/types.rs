use std::path::PathBuf;

/// yEnc header from =ybegin line
#[derive(Debug, Clone, PartialEq)]
pub struct YencHeader {
    /// Line length (typically 128, max 997)
    pub line: usize,
    /// Total file size in bytes
    pub size: u64,
    /// Original filename
    pub name: String,
    /// Part number (for multi-part files)
    pub part: Option<u32>,
    /// Total number of parts (for multi-part files)
    pub total: Option<u32>,
}

/// yEnc part header from =ypart line (for multi-part files)
#[derive(Debug, Clone, PartialEq)]
pub struct YencPart {
    /// 1-based byte offset where this part begins in the original file
    pub begin: u64,
    /// Byte offset where this part ends in the original file
    pub end: u64,
}

/// yEnc trailer from =yend line
#[derive(Debug, Clone, PartialEq)]
pub struct YencTrailer {
    /// Size of decoded data in bytes
    pub size: u64,
    /// CRC32 of the entire decoded file (single-part)
    pub crc32: Option<u32>,
    /// CRC32 of this part only (multi-part)
    pub pcrc32: Option<u32>,
}

impl YencTrailer {
    /// The CRC the trailer declares for this article's payload, if any
    pub fn declared_crc(&self) -> Option<u32> {
        self.pcrc32.or(self.crc32)
    }
}

/// Outcome of comparing the computed CRC32 against the trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcState {
    /// Computed CRC matched the declared value
    Matched,
    /// Computed CRC differed from the declared value; the segment is kept
    /// and PAR2 repair recovers the damage later
    Mismatched,
    /// The trailer declared no CRC
    Absent,
}

impl CrcState {
    /// Classify a computed CRC against an optional declared value
    pub fn from_check(computed: u32, declared: Option<u32>) -> Self {
        match declared {
            Some(expected) if expected == computed => CrcState::Matched,
            Some(_) => CrcState::Mismatched,
            None => CrcState::Absent,
        }
    }
}

/// Where a segment's decoded bytes live
#[derive(Debug, Clone)]
pub enum SegmentData {
    /// Decoded in memory (batch path)
    Buffered(Vec<u8>),
    /// Decoded onto disk (streaming path); the file is consumed and removed
    /// by the assembler
    Scratch {
        /// Scratch file holding the decoded bytes
        path: PathBuf,
        /// Decoded length in bytes
        len: u64,
    },
}

impl SegmentData {
    /// Decoded length in bytes
    pub fn len(&self) -> u64 {
        match self {
            SegmentData::Buffered(data) => data.len() as u64,
            SegmentData::Scratch { len, .. } => *len,
        }
    }

    /// Whether the segment decoded to zero bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully decoded segment with its yEnc metadata
#[derive(Debug, Clone)]
pub struct DecodedSegment {
    /// Parsed =ybegin header
    pub header: YencHeader,
    /// Part offsets from =ypart, when multi-part
    pub part: Option<YencPart>,
    /// Parsed =yend trailer
    pub trailer: YencTrailer,
    /// Decoded payload
    pub data: SegmentData,
    /// CRC32 computed over the decoded bytes
    pub computed_crc32: u32,
    /// Result of checking the computed CRC against the trailer
    pub crc: CrcState,
}

impl DecodedSegment {
    /// 0-based write offset in the output file, when the part header
    /// carries one (yEnc offsets are 1-based)
    pub fn file_offset(&self) -> Option<u64> {
        self.part.as_ref().map(|p| p.begin.saturating_sub(1))
    }

    /// Whether this article is one part of a multi-part file
    pub fn is_multipart(&self) -> bool {
        self.header.part.is_some() && self.header.total.is_some()
    }
}
