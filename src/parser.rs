//! Structured-field extraction over the semi-structured event titles.
//!
//! A usable title starts with a building token (letters + 3 digits) followed
//! by the dotted room code whose first segment repeats the token, e.g.
//! `"AP152 AP152.EG.108 Analysis 1 (VO), Musterfrau M."`. Everything else in
//! the feed is administrative noise and is dropped without comment.
//!
//! The matching strategy is deliberately hidden behind `parse_title` so it
//! can change without touching callers.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::models::slot_colors;
use crate::models::timetable::RawEvent;

pub const UNKNOWN_TEACHER: &str = "Unknown";

static TITLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+\d{3})\s+(([A-Za-z]+\d{3})\.([A-Za-z0-9]+)\.([A-Za-z0-9]+))").expect("valid title pattern")
});

/// Fields extracted from one event title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleFields {
    pub building: String,
    pub full_code: String,
    pub floor: String,
    pub number: String,
    pub short_title: String,
    pub teacher: String,
}

/// A class event after parsing, ready for room registration and timeline
/// generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEvent {
    pub external_id: String,
    pub building: String,
    pub room_code: String,
    pub floor: String,
    pub number: String,
    pub title: String,
    pub teacher: String,
    pub class_name: Option<String>,
    pub color: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Event(ClassEvent),
    /// Title does not look like a room booking.
    Skipped,
    /// Title belongs to a different building than the one being synced.
    ForeignBuilding,
}

/// Extract building/room/title/teacher fields from a raw title, or `None`
/// when the title does not follow the booking format.
pub fn parse_title(title: &str) -> Option<TitleFields> {
    let caps = TITLE_PATTERN.captures(title)?;
    let token = caps.get(1)?.as_str();
    let code_token = caps.get(3)?.as_str();
    if !token.eq_ignore_ascii_case(code_token) {
        return None;
    }

    let rest = &title[caps.get(0)?.end()..];
    let (left, right) = match rest.split_once(',') {
        Some((l, r)) => (l, Some(r)),
        None => (rest, None),
    };
    let short_title = left.split('(').next().unwrap_or("").trim().to_string();
    let teacher = right
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TEACHER)
        .to_string();

    Some(TitleFields {
        building: token.to_ascii_uppercase(),
        full_code: caps.get(2)?.as_str().to_ascii_uppercase(),
        floor: caps.get(4)?.as_str().to_ascii_uppercase(),
        number: caps.get(5)?.as_str().to_ascii_uppercase(),
        short_title,
        teacher,
    })
}

/// Turn one raw feed event into a `ClassEvent` for the requested building.
/// Pure transformation; room registration is the sync service's concern.
pub fn parse_event(raw: &RawEvent, requested_building: &str) -> ParseOutcome {
    let Some(fields) = parse_title(&raw.title) else {
        return ParseOutcome::Skipped;
    };
    if !fields.building.eq_ignore_ascii_case(requested_building) {
        return ParseOutcome::ForeignBuilding;
    }

    ParseOutcome::Event(ClassEvent {
        external_id: raw.id.to_string(),
        building: fields.building,
        room_code: fields.full_code,
        floor: fields.floor,
        number: fields.number,
        title: fields.short_title,
        teacher: fields.teacher,
        class_name: raw.class_name.as_ref().map(|c| c.joined()),
        color: raw
            .color
            .clone()
            .unwrap_or_else(|| slot_colors::BUSY_DEFAULT.to_string()),
        starts_at: raw.start,
        ends_at: raw.end,
    })
}
