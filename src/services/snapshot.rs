//! Point-in-time availability derived from the persisted timelines.
//!
//! The day-schedule query orders by floor, then room number, then slot start;
//! consumers rely on that ordering. Snapshot queries filter the schedule down
//! to the slot active at the query moment and attach derived metrics.

use crate::config::Config;
use crate::db::models::{Room, ScheduleSlot};
use crate::schema;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use core::fmt;
use diesel::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors surfaced to query callers. "Not available" (unknown building, no
/// generated schedule for the day) is distinct from an empty result.
#[derive(Debug)]
pub enum AvailabilityError {
    UnknownBuilding(String),
    NoSchedule { building: String, day: NaiveDate },
    Db(String),
}

impl Display for AvailabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityError::UnknownBuilding(code) => write!(f, "building {} has never been synced", code),
            AvailabilityError::NoSchedule { building, day } => {
                write!(f, "no schedule generated for building {} on {}", building, day)
            }
            AvailabilityError::Db(e) => write!(f, "database error: {}", e),
        }
    }
}

impl Error for AvailabilityError {}

/// One currently-active room slot plus its derived metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub floor: String,
    pub number: String,
    pub status: String,
    pub title: Option<String>,
    pub teacher: Option<String>,
    pub class_name: Option<String>,
    pub external_id: Option<String>,
    pub color: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    /// FREE: minutes until the room stops being free. BUSY: minutes until
    /// the running class ends. Floored, never negative.
    pub minutes_left: i64,
    /// FREE only: the instant the room stops being free, capped at the day
    /// window end.
    pub free_until: Option<NaiveDateTime>,
    /// FREE only: no further class before the day window closes.
    pub is_end_of_day: bool,
    /// BUSY only: minutes the room is free once the running class ends.
    pub next_slot_free_minutes: Option<i64>,
}

/// Current instant in the configured civil timezone.
pub fn current_local_moment(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Resolve an optional `YYYY-MM-DD` date and `HH:MM[:SS]` time into the query
/// moment. A date without a time defaults to the day window start; anything
/// unparseable (or absent) degrades to `now`. Never errors outward.
pub fn resolve_query_moment(
    date: Option<&str>,
    time: Option<&str>,
    day_start: NaiveTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let Some(date_raw) = date else { return now };
    let Ok(day) = NaiveDate::parse_from_str(date_raw.trim(), "%Y-%m-%d") else {
        return now;
    };
    match time {
        None => day.and_time(day_start),
        Some(time_raw) => {
            let time_raw = time_raw.trim();
            let parsed = NaiveTime::parse_from_str(time_raw, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(time_raw, "%H:%M"));
            match parsed {
                Ok(tod) => day.and_time(tod),
                Err(_) => now,
            }
        }
    }
}

/// Full generated schedule of a building for one day, ordered by floor, room
/// number, slot start.
pub fn day_schedule(
    conn: &mut PgConnection,
    building_code: &str,
    day: NaiveDate,
) -> Result<Vec<(Room, ScheduleSlot)>, AvailabilityError> {
    use schema::buildings::dsl as B;
    use schema::rooms::dsl as R;
    use schema::schedule_slots::dsl as S;

    let code = building_code.trim().to_ascii_uppercase();
    let db_building_id: i64 = B::buildings
        .filter(B::code.eq(&code))
        .select(B::id)
        .first(conn)
        .optional()
        .map_err(|e| AvailabilityError::Db(e.to_string()))?
        .ok_or_else(|| AvailabilityError::UnknownBuilding(code.clone()))?;

    let rows: Vec<(Room, ScheduleSlot)> = R::rooms
        .inner_join(S::schedule_slots)
        .filter(R::building_id.eq(db_building_id).and(S::day.eq(day)))
        .order((R::floor.asc(), R::number.asc(), S::starts_at.asc()))
        .select((Room::as_select(), ScheduleSlot::as_select()))
        .load(conn)
        .map_err(|e| AvailabilityError::Db(e.to_string()))?;
    if rows.is_empty() {
        return Err(AvailabilityError::NoSchedule { building: code, day });
    }
    Ok(rows)
}

/// One row of the day-schedule listing: a slot with its room attached.
#[derive(Debug, Clone, Serialize)]
pub struct DayScheduleEntry {
    pub room_code: String,
    pub floor: String,
    pub number: String,
    pub status: String,
    pub title: Option<String>,
    pub teacher: Option<String>,
    pub class_name: Option<String>,
    pub external_id: Option<String>,
    pub color: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

/// `day_schedule`, flattened for transport layers.
pub fn day_schedule_entries(
    conn: &mut PgConnection,
    building_code: &str,
    day: NaiveDate,
) -> Result<Vec<DayScheduleEntry>, AvailabilityError> {
    let rows = day_schedule(conn, building_code, day)?;
    Ok(rows
        .into_iter()
        .map(|(room, slot)| DayScheduleEntry {
            room_code: room.full_code,
            floor: room.floor,
            number: room.number,
            status: slot.status,
            title: slot.title,
            teacher: slot.teacher,
            class_name: slot.class_name,
            external_id: slot.external_id,
            color: slot.color,
            starts_at: slot.starts_at,
            ends_at: slot.ends_at,
        })
        .collect())
}

/// State of every room of a building at the resolved query moment.
pub fn snapshots_at(
    conn: &mut PgConnection,
    cfg: &Config,
    building_code: &str,
    date: Option<&str>,
    time: Option<&str>,
) -> Result<Vec<RoomSnapshot>, AvailabilityError> {
    let now = current_local_moment(cfg.timezone);
    let moment = resolve_query_moment(date, time, cfg.day_window_start, now);
    let rows = day_schedule(conn, building_code, moment.date())?;
    let day_end = moment.date().and_time(cfg.day_window_end);
    Ok(build_snapshots(&rows, moment, day_end))
}

/// Filter an ordered day schedule down to the slots active at `moment` and
/// compute the derived metrics. Preserves the input's room ordering.
pub fn build_snapshots(
    rows: &[(Room, ScheduleSlot)],
    moment: NaiveDateTime,
    day_end: NaiveDateTime,
) -> Vec<RoomSnapshot> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < rows.len() {
        let room = &rows[i].0;
        let mut j = i;
        while j < rows.len() && rows[j].0.id == room.id {
            j += 1;
        }
        let slots: Vec<&ScheduleSlot> = rows[i..j].iter().map(|(_, s)| s).collect();
        if let Some(snap) = snapshot_for_room(room, &slots, moment, day_end) {
            out.push(snap);
        }
        i = j;
    }
    out
}

fn snapshot_for_room(
    room: &Room,
    slots: &[&ScheduleSlot],
    moment: NaiveDateTime,
    day_end: NaiveDateTime,
) -> Option<RoomSnapshot> {
    // Half-open: a moment exactly on a boundary belongs to the starting slot.
    let active = slots.iter().find(|s| s.starts_at <= moment && moment < s.ends_at)?;

    let (minutes_left, free_until, is_end_of_day, next_slot_free_minutes) = if active.is_free() {
        let next_busy_start = slots
            .iter()
            .filter(|s| s.is_busy() && s.starts_at >= active.ends_at)
            .map(|s| s.starts_at)
            .min();
        let free_until = match next_busy_start {
            Some(start) => start.min(day_end),
            None => day_end,
        };
        let minutes_left = (free_until - moment).num_minutes().max(0);
        (minutes_left, Some(free_until), free_until == day_end, None)
    } else {
        let minutes_left = (active.ends_at - moment).num_minutes().max(0);
        let next_start = slots
            .iter()
            .filter(|s| s.starts_at > active.ends_at)
            .map(|s| s.starts_at)
            .min();
        let free_minutes = match next_start {
            Some(start) => (start.min(day_end) - active.ends_at).num_minutes().max(0),
            None => (day_end - active.ends_at).num_minutes().max(0),
        };
        (minutes_left, None, false, Some(free_minutes))
    };

    Some(RoomSnapshot {
        room_code: room.full_code.clone(),
        floor: room.floor.clone(),
        number: room.number.clone(),
        status: active.status.clone(),
        title: active.title.clone(),
        teacher: active.teacher.clone(),
        class_name: active.class_name.clone(),
        external_id: active.external_id.clone(),
        color: active.color.clone(),
        starts_at: active.starts_at,
        ends_at: active.ends_at,
        minutes_left,
        free_until,
        is_end_of_day,
        next_slot_free_minutes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{slot_colors, slot_status};
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    fn room(id: i64, floor: &str, number: &str) -> Room {
        Room {
            id,
            building_id: 1,
            floor: floor.to_string(),
            number: number.to_string(),
            full_code: format!("AP152.{}.{}", floor, number),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn free_slot(id: i64, room_id: i64, start: NaiveDateTime, end: NaiveDateTime) -> ScheduleSlot {
        ScheduleSlot {
            id,
            room_id,
            day: day(),
            starts_at: start,
            ends_at: end,
            status: slot_status::FREE.to_string(),
            title: None,
            teacher: None,
            class_name: None,
            external_id: None,
            color: slot_colors::FREE.to_string(),
        }
    }

    fn busy_slot(id: i64, room_id: i64, start: NaiveDateTime, end: NaiveDateTime) -> ScheduleSlot {
        ScheduleSlot {
            id,
            room_id,
            day: day(),
            starts_at: start,
            ends_at: end,
            status: slot_status::BUSY.to_string(),
            title: Some("Analysis 1".to_string()),
            teacher: Some("Musterfrau M.".to_string()),
            class_name: None,
            external_id: Some("7".to_string()),
            color: slot_colors::BUSY_DEFAULT.to_string(),
        }
    }

    fn rows(room: Room, slots: Vec<ScheduleSlot>) -> Vec<(Room, ScheduleSlot)> {
        slots.into_iter().map(|s| (room.clone(), s)).collect()
    }

    #[test]
    fn active_slot_boundaries_are_half_open() {
        let r = room(1, "EG", "108");
        let schedule = rows(
            r,
            vec![
                busy_slot(1, 1, t(10, 0, 0), t(11, 0, 0)),
                free_slot(2, 1, t(11, 0, 0), t(18, 15, 0)),
            ],
        );
        let end = t(18, 15, 0);

        let at_start = build_snapshots(&schedule, t(10, 0, 0), end);
        assert_eq!(at_start[0].status, slot_status::BUSY);

        let before_end = build_snapshots(&schedule, t(10, 59, 59), end);
        assert_eq!(before_end[0].status, slot_status::BUSY);

        let at_end = build_snapshots(&schedule, t(11, 0, 0), end);
        assert_eq!(at_end[0].status, slot_status::FREE);
    }

    #[test]
    fn free_until_stops_at_next_class() {
        let schedule = rows(
            room(1, "EG", "108"),
            vec![
                free_slot(1, 1, t(8, 0, 0), t(11, 0, 0)),
                busy_slot(2, 1, t(11, 0, 0), t(12, 0, 0)),
            ],
        );
        let snaps = build_snapshots(&schedule, t(9, 0, 0), t(18, 15, 0));
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].free_until, Some(t(11, 0, 0)));
        assert_eq!(snaps[0].minutes_left, 120);
        assert!(!snaps[0].is_end_of_day);
    }

    #[test]
    fn free_to_window_end_sets_end_of_day() {
        let schedule = rows(
            room(1, "EG", "108"),
            vec![
                busy_slot(1, 1, t(8, 0, 0), t(9, 0, 0)),
                free_slot(2, 1, t(9, 0, 0), t(18, 15, 0)),
            ],
        );
        let snaps = build_snapshots(&schedule, t(10, 0, 0), t(18, 15, 0));
        assert_eq!(snaps[0].free_until, Some(t(18, 15, 0)));
        assert!(snaps[0].is_end_of_day);
        assert_eq!(snaps[0].minutes_left, 495);
    }

    #[test]
    fn minutes_left_is_floored() {
        let schedule = rows(
            room(1, "EG", "108"),
            vec![free_slot(1, 1, t(8, 0, 0), t(18, 15, 0))],
        );
        let snaps = build_snapshots(&schedule, t(8, 0, 30), t(18, 15, 0));
        // 10h14m30s remaining, floored to full minutes
        assert_eq!(snaps[0].minutes_left, 614);
    }

    #[test]
    fn busy_slot_reports_following_free_stretch() {
        let schedule = rows(
            room(1, "EG", "108"),
            vec![
                busy_slot(1, 1, t(10, 0, 0), t(11, 0, 0)),
                free_slot(2, 1, t(11, 0, 0), t(12, 0, 0)),
                busy_slot(3, 1, t(12, 0, 0), t(13, 0, 0)),
                free_slot(4, 1, t(13, 0, 0), t(18, 15, 0)),
            ],
        );
        let snaps = build_snapshots(&schedule, t(10, 30, 0), t(18, 15, 0));
        assert_eq!(snaps[0].status, slot_status::BUSY);
        assert_eq!(snaps[0].minutes_left, 30);
        // free from 11:00 until the 12:00 class
        assert_eq!(snaps[0].next_slot_free_minutes, Some(60));
    }

    #[test]
    fn busy_with_nothing_after_runs_to_window_end() {
        let schedule = rows(
            room(1, "EG", "108"),
            vec![
                free_slot(1, 1, t(8, 0, 0), t(17, 0, 0)),
                busy_slot(2, 1, t(17, 0, 0), t(18, 15, 0)),
            ],
        );
        let snaps = build_snapshots(&schedule, t(17, 30, 0), t(18, 15, 0));
        assert_eq!(snaps[0].minutes_left, 45);
        assert_eq!(snaps[0].next_slot_free_minutes, Some(0));
    }

    #[test]
    fn rooms_keep_schedule_order() {
        let r1 = room(1, "EG", "108");
        let r2 = room(2, "01", "201");
        let mut schedule = rows(r2.clone(), vec![free_slot(1, 2, t(8, 0, 0), t(18, 15, 0))]);
        schedule.extend(rows(r1, vec![free_slot(2, 1, t(8, 0, 0), t(18, 15, 0))]));
        let snaps = build_snapshots(&schedule, t(9, 0, 0), t(18, 15, 0));
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].room_code, "AP152.01.201");
        assert_eq!(snaps[1].room_code, "AP152.EG.108");
    }

    #[test]
    fn moment_resolution_defaults_and_fallbacks() {
        let now = t(14, 30, 0);
        let day_start = NaiveTime::from_hms_opt(7, 0, 0).unwrap();

        assert_eq!(resolve_query_moment(None, None, day_start, now), now);
        assert_eq!(
            resolve_query_moment(Some("2026-03-02"), None, day_start, now),
            day().and_time(day_start)
        );
        assert_eq!(
            resolve_query_moment(Some("2026-03-02"), Some("10:15"), day_start, now),
            t(10, 15, 0)
        );
        assert_eq!(
            resolve_query_moment(Some("2026-03-02"), Some("10:15:30"), day_start, now),
            t(10, 15, 30)
        );
        assert_eq!(resolve_query_moment(Some("02.03.2026"), Some("10:15"), day_start, now), now);
        assert_eq!(resolve_query_moment(Some("2026-03-02"), Some("quarter past"), day_start, now), now);
        assert_eq!(resolve_query_moment(None, Some("10:15"), day_start, now), now);
    }
}
