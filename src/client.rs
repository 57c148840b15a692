//! Standalone HTTP client for the timetable feed.
//!
//! - Blocking client using `ureq` (no async).
//! - Returns the raw response body; the sync service fingerprints it before
//!   any JSON parsing happens, so an unchanged feed costs no deserialization.
//! - The feed is public read-only; no authentication.

use std::time::Duration;

const CLIENT_SIGNATURE: &str = concat!("freerooms/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub enum TimetableClientError {
    Transport(String),
    Http { status: u16, message: String },
}

impl core::fmt::Display for TimetableClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimetableClientError::Transport(s) => write!(f, "transport error: {}", s),
            TimetableClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
        }
    }
}

impl std::error::Error for TimetableClientError {}

pub struct TimetableClient {
    agent: ureq::Agent,
    base_url: String,
}

impl TimetableClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(CLIENT_SIGNATURE)
            .build();
        TimetableClient {
            agent,
            base_url: base_url.into(),
        }
    }

    /// Fetch the raw event feed for one building. The body is returned as-is
    /// so the caller can fingerprint it byte-for-byte.
    pub fn get_building_feed(&self, building_code: &str) -> Result<String, TimetableClientError> {
        let resp = self
            .agent
            .get(&self.base_url)
            .query("building", building_code)
            .set("Accept", "application/json")
            .call();
        match resp {
            Ok(res) => res
                .into_string()
                .map_err(|e| TimetableClientError::Transport(e.to_string())),
            Err(ureq::Error::Transport(t)) => Err(TimetableClientError::Transport(t.to_string())),
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(TimetableClientError::Http { status, message: body })
            }
        }
    }
}
