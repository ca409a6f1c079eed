//! Line-fed streaming yEnc decoder
//!
//! The batch decoder in [`super::decode`] needs the whole article body in
//! memory. Large segments instead stream: the NNTP connection hands body
//! lines to a [`StreamingDecoder`] as they arrive, and decoded bytes go
//! straight to an `AsyncWrite` sink (normally the per-segment scratch
//! file). Buffering stays bounded at one line plus the sink's own buffer:
//! the next line is not read until the sink write completes.

use crate::error::{EngineError, Result};
use crc32fast::Hasher;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::decode::decode_line;
use super::params::{parse_ybegin, parse_yend, parse_ypart};
use super::types::{CrcState, YencHeader, YencPart, YencTrailer};

/// Decoder state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for =ybegin
    WaitBegin,
    /// =ybegin seen; an =ypart line may follow
    InPart,
    /// Decoding data lines until =yend
    InData,
    /// =yend seen; no further lines accepted
    Finished,
}

/// Metadata resolved once the trailer arrives
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Parsed =ybegin header
    pub header: YencHeader,
    /// Part offsets from =ypart, when present
    pub part: Option<YencPart>,
    /// Parsed =yend trailer
    pub trailer: YencTrailer,
    /// Total decoded bytes written to the sink
    pub decoded_len: u64,
    /// CRC32 computed over the decoded bytes
    pub computed_crc32: u32,
    /// Computed CRC checked against the trailer
    pub crc: CrcState,
}

/// Streaming yEnc decoder writing decoded bytes to an output sink
///
/// Feed article body lines (without CRLF) through [`feed_line`]; it returns
/// `true` once =yend has been consumed. Call [`finish`] afterwards for the
/// collected metadata.
///
/// [`feed_line`]: StreamingDecoder::feed_line
/// [`finish`]: StreamingDecoder::finish
pub struct StreamingDecoder<W> {
    sink: W,
    state: State,
    header: Option<YencHeader>,
    part: Option<YencPart>,
    trailer: Option<YencTrailer>,
    hasher: Hasher,
    decoded_len: u64,
    // Reused per line so the hot loop does not allocate
    line_buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> StreamingDecoder<W> {
    /// Create a decoder writing to `sink`
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            state: State::WaitBegin,
            header: None,
            part: None,
            trailer: None,
            hasher: Hasher::new(),
            decoded_len: 0,
            line_buf: Vec::with_capacity(1024),
        }
    }

    /// Whether =yend has been consumed
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Feed one body line (CRLF already stripped, dot-unstuffed)
    ///
    /// Returns `true` when the trailer has been consumed and the stream is
    /// complete. Lines after the trailer are ignored.
    pub async fn feed_line(&mut self, line: &[u8]) -> Result<bool> {
        match self.state {
            State::WaitBegin => {
                if line.starts_with(b"=ybegin ") {
                    self.header = Some(parse_ybegin(control_line(line)?)?);
                    self.state = State::InPart;
                }
                // Headers or blank lines before =ybegin are skipped
                Ok(false)
            }
            State::InPart => {
                if line.starts_with(b"=ypart ") {
                    self.part = Some(parse_ypart(control_line(line)?)?);
                    self.state = State::InData;
                    Ok(false)
                } else {
                    self.state = State::InData;
                    self.consume(line).await
                }
            }
            State::InData => self.consume(line).await,
            State::Finished => Ok(true),
        }
    }

    async fn consume(&mut self, line: &[u8]) -> Result<bool> {
        if line.starts_with(b"=yend") {
            self.trailer = Some(parse_yend(control_line(line)?)?);
            self.state = State::Finished;
            self.sink.flush().await?;
            return Ok(true);
        }

        self.line_buf.clear();
        decode_line(line, &mut self.line_buf)?;
        self.hasher.update(&self.line_buf);
        self.decoded_len += self.line_buf.len() as u64;
        // Awaiting the sink here is the backpressure point: no further
        // socket reads happen until the write completes.
        self.sink.write_all(&self.line_buf).await?;
        Ok(false)
    }

    /// Consume the decoder, returning metadata and the sink
    ///
    /// Fails with [`EngineError::InvalidYenc`] if the stream ended before
    /// =ybegin or =yend were seen.
    pub fn finish(self) -> Result<(StreamOutcome, W)> {
        let header = self
            .header
            .ok_or_else(|| EngineError::InvalidYenc("stream ended before =ybegin".to_string()))?;
        let trailer = self
            .trailer
            .ok_or_else(|| EngineError::InvalidYenc("stream ended before =yend".to_string()))?;

        let computed_crc32 = self.hasher.finalize();
        let crc = CrcState::from_check(computed_crc32, trailer.declared_crc());

        Ok((
            StreamOutcome {
                header,
                part: self.part,
                trailer,
                decoded_len: self.decoded_len,
                computed_crc32,
                crc,
            },
            self.sink,
        ))
    }
}

fn control_line(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map(|s| s.trim_end_matches('\r'))
        .map_err(|_| EngineError::InvalidYenc("non-ASCII yEnc control line".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_lines(lines: &[&[u8]]) -> Result<(StreamOutcome, Vec<u8>)> {
        let mut decoder = StreamingDecoder::new(Vec::new());
        for line in lines {
            decoder.feed_line(line).await?;
        }
        decoder.finish()
    }

    #[tokio::test]
    async fn test_stream_simple() {
        // "Test" shifted by 42
        let (outcome, sink) = run_lines(&[
            b"=ybegin line=128 size=4 name=test.txt",
            &[126, 143, 157, 158],
            b"=yend size=4 crc32=784dd132",
        ])
        .await
        .unwrap();

        assert_eq!(sink, b"Test");
        assert_eq!(outcome.decoded_len, 4);
        assert_eq!(outcome.crc, CrcState::Matched);
        assert_eq!(outcome.header.name, "test.txt");
    }

    #[tokio::test]
    async fn test_stream_with_ypart() {
        let (outcome, sink) = run_lines(&[
            b"=ybegin part=2 total=2 line=128 size=2048 name=file.bin",
            b"=ypart begin=1025 end=2048",
            b"k",
            b"=yend size=1",
        ])
        .await
        .unwrap();

        assert_eq!(sink, b"A");
        assert_eq!(outcome.part.as_ref().unwrap().begin, 1025);
        assert_eq!(outcome.crc, CrcState::Absent);
    }

    #[tokio::test]
    async fn test_stream_skips_leading_junk() {
        let (_, sink) = run_lines(&[
            b"X-Header: ignored",
            b"",
            b"=ybegin line=128 size=1 name=x.bin",
            b"k",
            b"=yend size=1",
        ])
        .await
        .unwrap();
        assert_eq!(sink, b"A");
    }

    #[tokio::test]
    async fn test_stream_first_line_after_begin_is_data() {
        // No =ypart: the line after =ybegin is payload
        let (outcome, sink) = run_lines(&[
            b"=ybegin line=128 size=2 name=x.bin",
            b"kl",
            b"=yend size=2",
        ])
        .await
        .unwrap();
        assert_eq!(sink, b"AB");
        assert_eq!(outcome.part, None);
    }

    #[tokio::test]
    async fn test_stream_finished_flag() {
        let mut decoder = StreamingDecoder::new(Vec::new());
        assert!(!decoder.is_finished());
        decoder
            .feed_line(b"=ybegin line=128 size=1 name=x")
            .await
            .unwrap();
        decoder.feed_line(b"k").await.unwrap();
        let done = decoder.feed_line(b"=yend size=1").await.unwrap();
        assert!(done);
        assert!(decoder.is_finished());
        // Lines after the trailer are ignored
        assert!(decoder.feed_line(b"garbage").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_missing_yend_fails_finish() {
        let mut decoder = StreamingDecoder::new(Vec::new());
        decoder
            .feed_line(b"=ybegin line=128 size=1 name=x")
            .await
            .unwrap();
        decoder.feed_line(b"k").await.unwrap();
        assert!(matches!(
            decoder.finish(),
            Err(EngineError::InvalidYenc(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_missing_ybegin_fails_finish() {
        let decoder = StreamingDecoder::new(Vec::new());
        assert!(matches!(
            decoder.finish(),
            Err(EngineError::InvalidYenc(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_crc_mismatch_reported() {
        let (outcome, _) = run_lines(&[
            b"=ybegin line=128 size=4 name=test.txt",
            &[126, 143, 157, 158],
            b"=yend size=4 pcrc32=00000000",
        ])
        .await
        .unwrap();
        assert_eq!(outcome.crc, CrcState::Mismatched);
    }

    #[tokio::test]
    async fn test_stream_dot_line_payload() {
        // A data line that decodes to a single '.' (0x2e + 42 = 0x58 = 'X')
        let (_, sink) = run_lines(&[
            b"=ybegin line=128 size=1 name=dot.bin",
            b"X",
            b"=yend size=1",
        ])
        .await
        .unwrap();
        assert_eq!(sink, b".");
    }
}
