use crate::error::{EngineError, Result};
use crc32fast::Hasher;

use super::params::{parse_ybegin, parse_yend, parse_ypart};
use super::types::{CrcState, DecodedSegment, SegmentData};

/// Decode a complete yEnc-encoded article body
///
/// # Arguments
/// * `input` - article body bytes with CRLF line endings, including
///   =ybegin, data lines, and =yend
///
/// # Returns
/// A [`DecodedSegment`] with buffered payload and parsed metadata. A CRC
/// mismatch is recorded in the result, not treated as an error; a body that
/// cannot be delimited (missing =ybegin or =yend) is.
///
/// # Example
/// ```
/// // "hi!" with each byte shifted by 42
/// let encoded = b"=ybegin line=128 size=3 name=hi.bin\r\n\
///                 \x92\x93\x4b\r\n\
///                 =yend size=3\r\n";
/// let decoded = nzb_engine::yenc::decode(encoded).unwrap();
/// assert_eq!(decoded.data.len(), 3);
/// ```
pub fn decode(input: &[u8]) -> Result<DecodedSegment> {
    let lines: Vec<&[u8]> = split_lines(input);

    // Find the header; some servers prepend stray headers or blank lines
    let begin_idx = lines
        .iter()
        .position(|line| line.starts_with(b"=ybegin "))
        .ok_or_else(|| EngineError::InvalidYenc("missing =ybegin header".to_string()))?;

    let header_str = ascii_line(lines[begin_idx])?;
    let header = parse_ybegin(header_str)?;

    // Optional =ypart directly after =ybegin
    let mut part = None;
    let mut data_start = begin_idx + 1;
    if let Some(line) = lines.get(data_start)
        && line.starts_with(b"=ypart ")
    {
        part = Some(parse_ypart(ascii_line(line)?)?);
        data_start += 1;
    }

    // Trailer delimits the data section
    let trailer_idx = lines
        .iter()
        .rposition(|line| line.starts_with(b"=yend"))
        .ok_or_else(|| EngineError::InvalidYenc("missing =yend trailer".to_string()))?;

    if trailer_idx < data_start {
        return Err(EngineError::InvalidYenc(
            "=yend precedes the data section".to_string(),
        ));
    }

    let trailer = parse_yend(ascii_line(lines[trailer_idx])?)?;

    let mut decoded = Vec::with_capacity(trailer.size as usize);
    for line in &lines[data_start..trailer_idx] {
        decode_line(line, &mut decoded)?;
    }

    let mut hasher = Hasher::new();
    hasher.update(&decoded);
    let computed_crc32 = hasher.finalize();
    let crc = CrcState::from_check(computed_crc32, trailer.declared_crc());

    Ok(DecodedSegment {
        header,
        part,
        trailer,
        data: SegmentData::Buffered(decoded),
        computed_crc32,
        crc,
    })
}

/// Split on LF, keeping line contents without terminators
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &byte) in input.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&input[start..i]);
            start = i + 1;
        }
    }
    if start < input.len() {
        lines.push(&input[start..]);
    }
    lines
}

/// Control lines (=ybegin/=ypart/=yend) must be ASCII
fn ascii_line(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map(|s| s.trim_end_matches('\r'))
        .map_err(|_| EngineError::InvalidYenc("non-ASCII yEnc control line".to_string()))
}

/// Decode a single yEnc data line
///
/// yEnc maps `c -> (c - 42) mod 256`; `=` escapes the following byte as
/// `(c - 64 - 42) mod 256`. Critical escapes cover NUL, TAB, LF, CR, and
/// `=` itself.
pub(crate) fn decode_line(line: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;

    while i < line.len() {
        let byte = line[i];

        // CR at end of line is framing, not payload
        if byte == b'\r' {
            i += 1;
            continue;
        }

        if byte == b'=' {
            if i + 1 >= line.len() {
                return Err(EngineError::InvalidYenc(
                    "incomplete escape sequence at end of line".to_string(),
                ));
            }
            i += 1;
            output.push(line[i].wrapping_sub(64).wrapping_sub(42));
        } else {
            output.push(byte.wrapping_sub(42));
        }

        i += 1;
    }

    Ok(())
}
