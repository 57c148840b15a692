//! Models for the upstream timetable feed.
//!
//! Scope: types only — no API client code.
//!
//! Notes
//! - The feed is a flat JSON array of events; anything else is rejected by
//!   the sync service as a malformed payload.
//! - `start`/`end` are naive local datetimes (`YYYY-MM-DDTHH:MM:SS`) in the
//!   institution's civil timezone; the feed carries no offsets.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event identifier as delivered upstream. The feed is inconsistent and
/// sends either a JSON number or a string depending on the event source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Num(i64),
    Str(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Num(n) => write!(f, "{}", n),
            EventId::Str(s) => write!(f, "{}", s),
        }
    }
}

/// CSS class hint attached to an event; a single name or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassName {
    One(String),
    Many(Vec<String>),
}

impl ClassName {
    pub fn joined(&self) -> String {
        match self {
            ClassName::One(s) => s.clone(),
            ClassName::Many(v) => v.join(" "),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: EventId,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub class_name: Option<ClassName>,
    #[serde(default)]
    pub color: Option<String>,
}
