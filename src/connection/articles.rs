//! BODY and GROUP operations (RFC 3977 §6)

use crate::error::{EngineError, Result};
use crate::response::codes;
use tokio::sync::mpsc;
use tracing::trace;

/// Wrap a bare message-id in angle brackets
///
/// NZB manifests carry message-ids without `<>`; the wire wants them
/// wrapped. Already-wrapped ids pass through unchanged.
pub(crate) fn format_message_id(message_id: &str) -> String {
    if message_id.starts_with('<') {
        message_id.to_string()
    } else {
        format!("<{}>", message_id)
    }
}

impl super::NntpConnection {
    /// Select a newsgroup (`GROUP`); requires 211
    ///
    /// The selected group is cached so repeated fetches from the same group
    /// skip the round trip. Most providers resolve message-ids without a
    /// group; this is only issued when `ProviderConfig::issue_group` asks
    /// for it.
    pub async fn select_group(&mut self, group: &str) -> Result<()> {
        if self.current_group.as_deref() == Some(group) {
            return Ok(());
        }

        self.send_command(&format!("GROUP {}", group)).await?;
        let response = self.read_status().await?;

        if response.code != codes::GROUP_SELECTED {
            return Err(response.into_error());
        }

        self.current_group = Some(group.to_string());
        Ok(())
    }

    /// Send `BODY <mid>` and check the status
    ///
    /// Requires 220 or 222. Any other status leaves the connection in an
    /// unknown position relative to the stream, so it is marked broken;
    /// 430/423 surface as [`EngineError::NoSuchArticle`], the rest as
    /// [`EngineError::Protocol`].
    async fn body_handshake(&mut self, message_id: &str, group: Option<&str>) -> Result<()> {
        if self.provider.issue_group
            && let Some(group) = group
        {
            self.select_group(group).await?;
        }

        let wrapped = format_message_id(message_id);
        trace!("Fetching body: {}", wrapped);
        self.send_command(&format!("BODY {}", wrapped)).await?;

        let response = self.read_status().await?;
        match response.code {
            codes::ARTICLE_FOLLOWS | codes::BODY_FOLLOWS => Ok(()),
            codes::NO_SUCH_ARTICLE_ID | codes::NO_SUCH_ARTICLE_NUMBER => {
                self.mark_broken();
                Err(EngineError::NoSuchArticle(message_id.to_string()))
            }
            _ => {
                self.mark_broken();
                Err(response.into_error())
            }
        }
    }

    /// Fetch an article body into memory
    ///
    /// Returns the dot-unstuffed body with CRLF line endings, the
    /// terminator consumed.
    pub async fn fetch_body(&mut self, message_id: &str, group: Option<&str>) -> Result<Vec<u8>> {
        self.body_handshake(message_id, group).await?;
        self.read_body_buffered().await
    }

    /// Fetch an article body as a stream of lines
    ///
    /// Each dot-unstuffed body line is sent through `tx`; the method
    /// returns once the terminator is consumed. The channel bound
    /// backpressures the socket.
    pub async fn fetch_body_streamed(
        &mut self,
        message_id: &str,
        group: Option<&str>,
        tx: &mpsc::Sender<Result<Vec<u8>>>,
    ) -> Result<()> {
        self.body_handshake(message_id, group).await?;
        self.stream_body_lines(tx).await
    }
}
