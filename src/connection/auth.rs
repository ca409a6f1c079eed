//! AUTHINFO USER/PASS authentication (RFC 4643 subset)

use crate::error::{EngineError, Result};
use crate::response::codes;
use tracing::debug;

impl super::NntpConnection {
    /// Authenticate with the provider's configured credentials
    ///
    /// Sends `AUTHINFO USER`; a 381 means the server wants the password,
    /// 281 on either exchange is success, anything else is
    /// [`EngineError::AuthFailed`].
    pub(super) async fn authenticate(&mut self) -> Result<()> {
        let (username, password) = match (&self.provider.username, &self.provider.password) {
            (Some(user), Some(pass)) => (user.clone(), pass.clone()),
            (Some(user), None) => (user.clone(), String::new()),
            _ => return Ok(()),
        };

        debug!("Authenticating as {}", username);

        self.send_command(&format!("AUTHINFO USER {}", username))
            .await?;
        let response = self.read_status().await?;

        match response.code {
            codes::AUTH_ACCEPTED => Ok(()),
            codes::AUTH_CONTINUE => {
                self.send_command(&format!("AUTHINFO PASS {}", password))
                    .await?;
                let response = self.read_status().await?;

                if response.code == codes::AUTH_ACCEPTED {
                    debug!("Authentication successful");
                    Ok(())
                } else {
                    // Only the status code is reported; server messages can
                    // echo credentials
                    Err(EngineError::AuthFailed(format!(
                        "rejected with status {}",
                        response.code
                    )))
                }
            }
            code => Err(EngineError::AuthFailed(format!(
                "rejected with status {}",
                code
            ))),
        }
    }
}
