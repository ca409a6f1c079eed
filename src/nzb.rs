//! NZB manifest parser
//!
//! NZB is an XML-based file format used to describe Usenet binary posts.
//! It contains metadata and segment references for binary downloads.
//!
//! Reference: https://sabnzbd.org/wiki/extra/nzb-spec

use crate::error::{EngineError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

/// Parsed NZB manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Nzb {
    /// Metadata from the <head> section (title, password, category, ...)
    pub meta: HashMap<String, String>,
    /// Files described in this NZB
    pub files: Vec<NzbFile>,
}

/// A single file entry in an NZB
#[derive(Debug, Clone, PartialEq)]
pub struct NzbFile {
    /// Subject line of the posting
    pub subject: String,
    /// Filename derived from the subject
    pub filename: String,
    /// Newsgroups where this file was posted
    pub groups: Vec<String>,
    /// Segments (articles) making up this file, in manifest order
    pub segments: Vec<NzbSegment>,
}

/// A segment (article) of a file
#[derive(Debug, Clone, PartialEq)]
pub struct NzbSegment {
    /// Segment number within its file (1-based)
    pub number: u32,
    /// Expected size of this segment in bytes
    pub bytes: u64,
    /// Message-ID for retrieving this segment, without angle brackets
    pub message_id: String,
}

impl NzbFile {
    /// Total size of all segments
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    /// Whether this entry is PAR2 recovery data
    ///
    /// PAR2 files ride along in most NZBs; the engine skips them during
    /// download and leaves recovery to the repair stage.
    pub fn is_par2(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".par2")
    }

    /// First newsgroup, used when a provider requires GROUP before BODY
    pub fn primary_group(&self) -> Option<&str> {
        self.groups.first().map(String::as_str)
    }
}

impl Nzb {
    /// Total size of all files
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes()).sum()
    }

    /// Total segment count across all files
    pub fn total_segments(&self) -> usize {
        self.files.iter().map(|f| f.segments.len()).sum()
    }
}

/// Derive a filename from a subject line
///
/// The first double-quoted string wins; otherwise the first
/// whitespace-delimited token; otherwise `file_<index>`.
pub fn derive_filename(subject: &str, index: usize) -> String {
    if let Some(open) = subject.find('"')
        && let Some(close) = subject[open + 1..].find('"')
    {
        let quoted = &subject[open + 1..open + 1 + close];
        if !quoted.is_empty() {
            return quoted.to_string();
        }
    }

    if let Some(token) = subject.split_whitespace().next() {
        return token.to_string();
    }

    format!("file_{}", index)
}

/// Parse an NZB manifest from XML
///
/// # Example
/// ```
/// let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
/// <nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
///   <file poster="user@example.com" date="1234567890" subject="&quot;test.bin&quot; yEnc (1/1)">
///     <groups><group>alt.binaries.test</group></groups>
///     <segments><segment bytes="768000" number="1">part1@example.com</segment></segments>
///   </file>
/// </nzb>"#;
///
/// let nzb = nzb_engine::nzb::parse_nzb(xml).unwrap();
/// assert_eq!(nzb.files.len(), 1);
/// assert_eq!(nzb.files[0].filename, "test.bin");
/// ```
pub fn parse_nzb(xml: &str) -> Result<Nzb> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut nzb = Nzb {
        meta: HashMap::new(),
        files: Vec::new(),
    };

    let mut in_head = false;
    let mut in_groups = false;
    let mut in_segments = false;
    let mut meta_type: Option<String> = None;

    let mut current_file: Option<NzbFile> = None;
    // Attributes of the <segment> currently open; text content carries the
    // message-id
    let mut current_segment: Option<(u32, u64)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"head" => in_head = true,
                b"meta" if in_head => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"type" {
                            meta_type = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                b"file" => {
                    let mut subject = String::new();
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"subject" {
                            subject = attr.unescape_value().unwrap_or_default().to_string();
                        }
                    }
                    current_file = Some(NzbFile {
                        subject,
                        filename: String::new(),
                        groups: Vec::new(),
                        segments: Vec::new(),
                    });
                }
                b"groups" if current_file.is_some() => in_groups = true,
                b"segments" if current_file.is_some() => in_segments = true,
                b"segment" if in_segments => {
                    let mut bytes = 0u64;
                    let mut number = 0u32;
                    for attr in e.attributes().flatten() {
                        let value = String::from_utf8_lossy(&attr.value);
                        match attr.key.as_ref() {
                            b"bytes" => bytes = value.parse().unwrap_or(0),
                            b"number" => number = value.parse().unwrap_or(0),
                            _ => {}
                        }
                    }
                    current_segment = Some((number, bytes));
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    // trim_text leaves nothing for whitespace-only nodes
                } else if let Some(key) = meta_type.take() {
                    nzb.meta.insert(key, text);
                } else if in_groups {
                    if let Some(file) = current_file.as_mut() {
                        file.groups.push(text);
                    }
                } else if let Some((number, bytes)) = current_segment {
                    if let Some(file) = current_file.as_mut()
                        && number > 0
                    {
                        file.segments.push(NzbSegment {
                            number,
                            bytes,
                            message_id: text,
                        });
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"head" => in_head = false,
                b"meta" => meta_type = None,
                b"groups" => in_groups = false,
                b"segments" => in_segments = false,
                b"segment" => current_segment = None,
                b"file" => {
                    if let Some(mut file) = current_file.take() {
                        file.filename = derive_filename(&file.subject, nzb.files.len());
                        nzb.files.push(file);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::InvalidNzb(format!("XML parse error: {}", e)));
            }
            _ => {}
        }

        buf.clear();
    }

    if nzb.files.is_empty() {
        return Err(EngineError::InvalidNzb("NZB has no files".to_string()));
    }

    Ok(nzb)
}
