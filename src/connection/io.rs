//! Low-level I/O for NNTP protocol communication
//!
//! Command transmission, status-line parsing, and multi-line body framing
//! (buffered and streamed). Bytes are handled raw so 8-bit yEnc data
//! survives; only status and control lines are interpreted as text.

use crate::error::{EngineError, Result};
use crate::response::NntpStatus;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

impl super::NntpConnection {
    /// Send a command line (`\r\n` appended)
    pub(crate) async fn send_command(&mut self, command: &str) -> Result<()> {
        trace!("Sending command: {}", command);
        let stream = self
            .stream
            .as_mut()
            .ok_or(EngineError::ConnectionClosed)?;
        stream.get_mut().write_all(command.as_bytes()).await?;
        stream.get_mut().write_all(b"\r\n").await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    /// Read one raw line including its terminator, under the per-command
    /// deadline
    ///
    /// An empty read means the peer closed the stream; both that and a
    /// deadline expiry mark the connection broken.
    async fn read_line_raw(&mut self) -> Result<Vec<u8>> {
        let deadline = self.provider.article_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or(EngineError::ConnectionClosed)?;

        let mut line = Vec::with_capacity(512);
        let read = timeout(deadline, stream.read_until(b'\n', &mut line)).await;

        match read {
            Ok(Ok(0)) => {
                self.mark_broken();
                Err(EngineError::ConnectionClosed)
            }
            Ok(Ok(_)) => Ok(line),
            Ok(Err(e)) => {
                self.mark_broken();
                Err(EngineError::Io(e))
            }
            Err(_) => {
                self.mark_broken();
                Err(EngineError::Timeout)
            }
        }
    }

    /// Read and parse a status line
    pub(crate) async fn read_status(&mut self) -> Result<NntpStatus> {
        let line_bytes = self.read_line_raw().await?;
        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end();
        trace!("Received: {}", line);

        let status = NntpStatus::parse(line);
        if status.is_err() {
            // Garbage where a status line should be: desynchronized
            self.mark_broken();
        }
        status
    }

    /// Read a multi-line body into memory
    ///
    /// Lines are dot-unstuffed and re-joined with CRLF (the yEnc batch
    /// decoder wants the body with its line structure intact). The lone
    /// `.` terminator is consumed and not included.
    pub(crate) async fn read_body_buffered(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(512 * 1024);

        loop {
            let line = self.read_line_raw().await?;

            match classify_body_line(&line) {
                BodyLine::Terminator => break,
                BodyLine::Data(content) => {
                    body.extend_from_slice(content);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }

        Ok(body)
    }

    /// Stream a multi-line body through a bounded channel, one
    /// dot-unstuffed line per message
    ///
    /// The channel bound is the backpressure seam: when the receiver (the
    /// streaming decoder) is busy flushing to disk, `send` suspends and no
    /// further socket reads happen. A dropped receiver aborts the body
    /// mid-stream, which leaves the connection desynchronized, so it is
    /// marked broken.
    pub(crate) async fn stream_body_lines(
        &mut self,
        tx: &mpsc::Sender<Result<Vec<u8>>>,
    ) -> Result<()> {
        loop {
            let line = self.read_line_raw().await?;

            match classify_body_line(&line) {
                BodyLine::Terminator => return Ok(()),
                BodyLine::Data(content) => {
                    let content = content.to_vec();
                    if tx.send(Ok(content)).await.is_err() {
                        self.mark_broken();
                        return Err(EngineError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

enum BodyLine<'a> {
    /// Lone `.`: end of the multi-line block
    Terminator,
    /// Payload with terminators stripped and dot-stuffing removed
    Data(&'a [u8]),
}

/// Strip `\r\n`/`\n`, detect the terminator, and de-stuff leading dots
fn classify_body_line(line: &[u8]) -> BodyLine<'_> {
    let content = if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") {
        &line[..line.len() - 1]
    } else {
        line
    };

    if content == b"." {
        BodyLine::Terminator
    } else if content.starts_with(b"..") {
        BodyLine::Data(&content[1..])
    } else {
        BodyLine::Data(content)
    }
}
