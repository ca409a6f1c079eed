use crate::error::{EngineError, Result};
use std::collections::HashMap;

use super::types::{YencHeader, YencPart, YencTrailer};

/// Parse yEnc =ybegin header line
///
/// Format: =ybegin line=128 size=123456 [part=1 total=5] name=file.bin
pub(crate) fn parse_ybegin(line: &str) -> Result<YencHeader> {
    let rest = line
        .strip_prefix("=ybegin ")
        .ok_or_else(|| EngineError::InvalidYenc(format!("invalid =ybegin line: {}", line)))?;

    // The name is always the last parameter and may contain spaces, so it
    // is split off before the key=value scan.
    let (params_str, name) = match rest.split_once("name=") {
        Some((head, name)) => (head, Some(name.trim_end().to_string())),
        None => (rest, None),
    };

    let params = parse_params(params_str);

    let line_len = params
        .get("line")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidYenc("missing 'line' parameter".to_string()))?;

    let size = params
        .get("size")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidYenc("missing 'size' parameter".to_string()))?;

    let name =
        name.ok_or_else(|| EngineError::InvalidYenc("missing 'name' parameter".to_string()))?;

    Ok(YencHeader {
        line: line_len,
        size,
        name,
        part: params.get("part").and_then(|s| s.parse().ok()),
        total: params.get("total").and_then(|s| s.parse().ok()),
    })
}

/// Parse yEnc =ypart line
///
/// Format: =ypart begin=1 end=123456
pub(crate) fn parse_ypart(line: &str) -> Result<YencPart> {
    let rest = line
        .strip_prefix("=ypart ")
        .ok_or_else(|| EngineError::InvalidYenc(format!("invalid =ypart line: {}", line)))?;

    let params = parse_params(rest);

    let begin = params
        .get("begin")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidYenc("missing 'begin' parameter".to_string()))?;

    let end = params
        .get("end")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidYenc("missing 'end' parameter".to_string()))?;

    Ok(YencPart { begin, end })
}

/// Parse yEnc =yend trailer line
///
/// Format: =yend size=123456 [part=1] [crc32=12345678] [pcrc32=87654321]
pub(crate) fn parse_yend(line: &str) -> Result<YencTrailer> {
    let rest = line
        .strip_prefix("=yend")
        .map(|r| r.trim_start())
        .ok_or_else(|| EngineError::InvalidYenc(format!("invalid =yend line: {}", line)))?;

    let params = parse_params(rest);

    let size = params
        .get("size")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidYenc("missing 'size' parameter".to_string()))?;

    // CRC values are hex
    let crc32 = params
        .get("crc32")
        .and_then(|s| u32::from_str_radix(s, 16).ok());
    let pcrc32 = params
        .get("pcrc32")
        .and_then(|s| u32::from_str_radix(s, 16).ok());

    Ok(YencTrailer {
        size,
        crc32,
        pcrc32,
    })
}

/// Scan space-separated key=value pairs
fn parse_params(params: &str) -> HashMap<&str, &str> {
    params
        .split_ascii_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ybegin_simple() {
        let header = parse_ybegin("=ybegin line=128 size=123456 name=test.bin").unwrap();
        assert_eq!(header.line, 128);
        assert_eq!(header.size, 123456);
        assert_eq!(header.name, "test.bin");
        assert_eq!(header.part, None);
        assert_eq!(header.total, None);
    }

    #[test]
    fn test_parse_ybegin_multipart() {
        let header = parse_ybegin("=ybegin part=1 total=5 line=128 size=123456 name=file.rar")
            .unwrap();
        assert_eq!(header.part, Some(1));
        assert_eq!(header.total, Some(5));
        assert_eq!(header.name, "file.rar");
    }

    #[test]
    fn test_parse_ybegin_name_with_spaces() {
        let header =
            parse_ybegin("=ybegin line=128 size=99 name=My Great File (2024).mkv").unwrap();
        assert_eq!(header.name, "My Great File (2024).mkv");
    }

    #[test]
    fn test_parse_ybegin_missing_size() {
        let result = parse_ybegin("=ybegin line=128 name=test.bin");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_ypart() {
        let part = parse_ypart("=ypart begin=1 end=384000").unwrap();
        assert_eq!(part.begin, 1);
        assert_eq!(part.end, 384000);
    }

    #[test]
    fn test_parse_ypart_rejects_other_lines() {
        assert!(parse_ypart("=ybegin line=128 size=1 name=x").is_err());
    }

    #[test]
    fn test_parse_yend_pcrc32() {
        let end = parse_yend("=yend size=384000 pcrc32=12345678").unwrap();
        assert_eq!(end.size, 384000);
        assert_eq!(end.pcrc32, Some(0x12345678));
        assert_eq!(end.crc32, None);
    }

    #[test]
    fn test_parse_yend_crc32_uppercase_hex() {
        let end = parse_yend("=yend size=5 crc32=ABCDEF12").unwrap();
        assert_eq!(end.crc32, Some(0xABCDEF12));
    }

    #[test]
    fn test_parse_yend_no_crc() {
        let end = parse_yend("=yend size=5").unwrap();
        assert_eq!(end.declared_crc(), None);
    }
}
