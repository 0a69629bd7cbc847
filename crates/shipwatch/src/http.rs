use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::{Error, Result};

pub(crate) const USER_AGENT: &str = concat!("shipwatch/", env!("CARGO_PKG_VERSION"));

/// Blocking client with a hard request timeout; nothing we call may hang a cycle.
pub(crate) fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}
