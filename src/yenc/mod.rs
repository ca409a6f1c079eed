//! yEnc binary decoding for Usenet articles
//!
//! yEnc is a binary-to-text encoding scheme designed specifically for
//! Usenet; it has only 1-2% overhead compared to 33-40% for Base64.
//! The engine decodes two ways: [`decode`] takes a complete article body,
//! [`StreamingDecoder`] consumes lines as the connection reads them and
//! writes decoded bytes straight to an output sink.
//!
//! Reference: http://www.yenc.org/yenc-draft.1.3.txt

pub mod decode;
pub mod params;
pub mod stream;
pub mod types;

pub use decode::decode;
pub use stream::StreamingDecoder;
pub use types::{CrcState, DecodedSegment, SegmentData, YencHeader, YencPart, YencTrailer};
