//! Shared test infrastructure: an in-process NNTP server and a yEnc
//! encoder for fabricating article bodies.

// Each integration test crate pulls in the subset it needs
#![allow(dead_code)]

use crc32fast::Hasher;
use nzb_engine::ProviderConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Scripted behavior for one article on the mock server
#[derive(Debug, Clone)]
pub enum Article {
    /// 222 followed by the body (CRLF lines; the server applies
    /// dot-stuffing and appends the terminator)
    Body(Vec<u8>),
    /// 430 no such article
    NotFound,
    /// Close the socket mid-body for the first `failures` attempts, then
    /// serve the body normally
    FailThenBody { failures: u32, body: Vec<u8> },
}

#[derive(Default)]
pub struct ServerOptions {
    /// Write output in chunks of this many bytes (0 = single write)
    pub chunk_size: usize,
    /// Artificial delay before serving each body
    pub body_delay: Duration,
    /// Demand AUTHINFO before serving bodies
    pub require_auth: bool,
}

struct ServerState {
    articles: Mutex<HashMap<String, Article>>,
    /// BODY message-ids in the order the server received them
    body_order: Mutex<Vec<String>>,
    /// BODY attempts per message-id
    attempts: Mutex<HashMap<String, u32>>,
    active_connections: AtomicUsize,
    /// High-water mark of simultaneous connections
    peak_connections: AtomicUsize,
    options: ServerOptions,
}

/// In-process NNTP server backing the integration tests
pub struct MockNntpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockNntpServer {
    pub async fn start(articles: HashMap<String, Article>) -> Self {
        Self::start_with_options(articles, ServerOptions::default()).await
    }

    pub async fn start_with_options(
        articles: HashMap<String, Article>,
        options: ServerOptions,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            articles: Mutex::new(articles),
            body_order: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            active_connections: AtomicUsize::new(0),
            peak_connections: AtomicUsize::new(0),
            options,
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, conn_state).await;
                });
            }
        });

        Self { addr, state }
    }

    /// Provider config pointing at this server, tuned for fast tests
    pub fn provider(&self, id: &str) -> ProviderConfig {
        let mut provider = ProviderConfig::plain(id, "127.0.0.1", self.addr.port());
        provider.article_timeout_ms = 3_000;
        provider.retry_attempts = 3;
        provider.retry_backoff_ms = 20;
        provider
    }

    pub fn body_order(&self) -> Vec<String> {
        self.state.body_order.lock().unwrap().clone()
    }

    pub fn attempts(&self, message_id: &str) -> u32 {
        self.state
            .attempts
            .lock()
            .unwrap()
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_connections(&self) -> usize {
        self.state.peak_connections.load(Ordering::SeqCst)
    }
}

async fn handle_connection(socket: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let active = state.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_connections.fetch_max(active, Ordering::SeqCst);

    let result = serve(socket, &state).await;

    state.active_connections.fetch_sub(1, Ordering::SeqCst);
    result
}

async fn serve(socket: TcpStream, state: &Arc<ServerState>) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    send(&mut write_half, b"200 mock NNTP ready\r\n", state).await?;

    let mut authed = false;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();

        if command.starts_with("AUTHINFO USER") {
            send(&mut write_half, b"381 password required\r\n", state).await?;
        } else if command.starts_with("AUTHINFO PASS") {
            authed = true;
            send(&mut write_half, b"281 authentication accepted\r\n", state).await?;
        } else if command.starts_with("GROUP ") {
            send(&mut write_half, b"211 0 1 1 group selected\r\n", state).await?;
        } else if state.options.require_auth && !authed {
            send(&mut write_half, b"480 authentication required\r\n", state).await?;
        } else if let Some(raw_mid) = command.strip_prefix("BODY ") {
            let mid = raw_mid
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();

            {
                state.body_order.lock().unwrap().push(mid.clone());
                *state.attempts.lock().unwrap().entry(mid.clone()).or_insert(0) += 1;
            }

            if !state.options.body_delay.is_zero() {
                tokio::time::sleep(state.options.body_delay).await;
            }

            let article = state.articles.lock().unwrap().get(&mid).cloned();
            match article {
                None | Some(Article::NotFound) => {
                    send(&mut write_half, b"430 no such article\r\n", state).await?;
                }
                Some(Article::Body(body)) => {
                    send(&mut write_half, b"222 0 body follows\r\n", state).await?;
                    write_body(&mut write_half, &body, state).await?;
                }
                Some(Article::FailThenBody { failures, body }) => {
                    let attempt = state.attempts.lock().unwrap()[&mid];
                    if attempt <= failures {
                        // Status plus a partial body, then hang up
                        send(&mut write_half, b"222 0 body follows\r\n", state).await?;
                        let partial = &body[..body.len() / 2];
                        write_half.write_all(partial).await?;
                        write_half.flush().await?;
                        return Ok(());
                    }
                    send(&mut write_half, b"222 0 body follows\r\n", state).await?;
                    write_body(&mut write_half, &body, state).await?;
                }
            }
        } else {
            send(&mut write_half, b"500 command not recognized\r\n", state).await?;
        }
    }
}

/// Write a body with NNTP dot-stuffing and the lone-dot terminator
async fn write_body<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
    state: &Arc<ServerState>,
) -> std::io::Result<()> {
    let mut wire = Vec::with_capacity(body.len() + 16);
    for line in split_crlf_lines(body) {
        if line.first() == Some(&b'.') {
            wire.push(b'.');
        }
        wire.extend_from_slice(line);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b".\r\n");
    send(writer, &wire, state).await
}

/// Split body bytes into lines, tolerating a missing final CRLF
fn split_crlf_lines(body: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\n' {
            let end = if i > start && body[i - 1] == b'\r' {
                i - 1
            } else {
                i
            };
            lines.push(&body[start..end]);
            start = i + 1;
        }
        i += 1;
    }
    if start < body.len() {
        lines.push(&body[start..]);
    }
    lines
}

/// Write bytes, optionally fragmented to exercise framing under arbitrary
/// TCP chunk boundaries
async fn send<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    state: &Arc<ServerState>,
) -> std::io::Result<()> {
    let chunk = state.options.chunk_size;
    if chunk == 0 {
        writer.write_all(bytes).await?;
    } else {
        for piece in bytes.chunks(chunk) {
            writer.write_all(piece).await?;
            writer.flush().await?;
        }
    }
    writer.flush().await
}

/// Encode bytes as a yEnc article body (CRLF lines, =ybegin/=yend, and
/// `pcrc32`/`crc32` trailers)
///
/// `part` is `(part_number, total_parts, begin, end)` with 1-based
/// offsets, producing the =ypart form.
pub fn yenc_encode(
    data: &[u8],
    line_width: usize,
    name: &str,
    part: Option<(u32, u32, u64, u64)>,
) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(data);
    yenc_encode_with_crc(data, line_width, name, part, hasher.finalize())
}

/// Like [`yenc_encode`] but with an explicit CRC value in the trailer,
/// for fabricating mismatches
pub fn yenc_encode_with_crc(
    data: &[u8],
    line_width: usize,
    name: &str,
    part: Option<(u32, u32, u64, u64)>,
    crc: u32,
) -> Vec<u8> {
    let mut out = Vec::new();

    match part {
        Some((number, total, _, _)) => {
            out.extend_from_slice(
                format!(
                    "=ybegin part={} total={} line={} size={} name={}\r\n",
                    number,
                    total,
                    line_width,
                    data.len(),
                    name
                )
                .as_bytes(),
            );
        }
        None => {
            out.extend_from_slice(
                format!(
                    "=ybegin line={} size={} name={}\r\n",
                    line_width,
                    data.len(),
                    name
                )
                .as_bytes(),
            );
        }
    }

    if let Some((_, _, begin, end)) = part {
        out.extend_from_slice(format!("=ypart begin={} end={}\r\n", begin, end).as_bytes());
    }

    let mut column = 0;
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        // Critical characters, plus a leading dot to stay out of the
        // dot-stuffing path
        let critical = matches!(encoded, 0x00 | 0x0a | 0x0d | b'=')
            || (column == 0 && encoded == b'.');
        if critical {
            out.push(b'=');
            out.push(encoded.wrapping_add(64));
            column += 2;
        } else {
            out.push(encoded);
            column += 1;
        }
        if column >= line_width {
            out.extend_from_slice(b"\r\n");
            column = 0;
        }
    }
    if column > 0 {
        out.extend_from_slice(b"\r\n");
    }

    let trailer = match part {
        Some((number, _, _, _)) => format!(
            "=yend size={} part={} pcrc32={:08x}\r\n",
            data.len(),
            number,
            crc
        ),
        None => format!("=yend size={} crc32={:08x}\r\n", data.len(), crc),
    };
    out.extend_from_slice(trailer.as_bytes());
    out
}

/// Minimal NZB manifest builder: `files` is (subject, [(number, bytes,
/// message_id)])
pub fn build_nzb(files: &[(&str, Vec<(u32, u64, &str)>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );
    for (subject, segments) in files {
        xml.push_str(&format!(
            "  <file poster=\"tester@example.com\" date=\"1700000000\" subject=\"{}\">\n",
            subject.replace('"', "&quot;")
        ));
        xml.push_str("    <groups><group>alt.binaries.test</group></groups>\n    <segments>\n");
        for (number, bytes, mid) in segments {
            xml.push_str(&format!(
                "      <segment bytes=\"{}\" number=\"{}\">{}</segment>\n",
                bytes, number, mid
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}
