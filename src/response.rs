//! NNTP status lines and response codes

use crate::error::{EngineError, Result};

/// Parsed NNTP status line
///
/// The first three octets of a status line form the response code; the
/// remainder is the human-readable message.
#[derive(Debug, Clone)]
pub struct NntpStatus {
    /// 3-digit NNTP response code
    pub code: u16,
    /// Status message from server
    pub message: String,
}

impl NntpStatus {
    /// Parse a status line (CRLF already stripped)
    pub fn parse(line: &str) -> Result<Self> {
        let code = line
            .get(..3)
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| EngineError::Protocol {
                code: 0,
                message: format!("malformed status line: {:?}", line),
            })?;

        let message = line[3..].trim().to_string();
        Ok(Self { code, message })
    }

    /// Check if the status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Check if the status indicates continuation (3xx)
    pub fn is_continuation(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Check if the status indicates an error (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Convert into a protocol error
    pub fn into_error(self) -> EngineError {
        EngineError::Protocol {
            code: self.code,
            message: self.message,
        }
    }
}

/// NNTP response codes used by the engine (RFC 3977 subset)
pub mod codes {
    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Server ready, no posting
    pub const READY_NO_POSTING: u16 = 201;
    /// Group selected
    pub const GROUP_SELECTED: u16 = 211;
    /// Article follows
    pub const ARTICLE_FOLLOWS: u16 = 220;
    /// Body follows
    pub const BODY_FOLLOWS: u16 = 222;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Continue with authentication (password required)
    pub const AUTH_CONTINUE: u16 = 381;
    /// No such newsgroup
    pub const NO_SUCH_GROUP: u16 = 411;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Authentication required
    pub const AUTH_REQUIRED: u16 = 480;
    /// Authentication rejected
    pub const AUTH_REJECTED: u16 = 481;
}
