//! Regeneration of the per-room FREE/BUSY day timelines.
//!
//! For every day in the observed event range, each room's slots are rebuilt
//! from scratch: existing rows are deleted and a contiguous partition of the
//! configured day window is inserted, all inside one transaction so readers
//! only ever see a complete timeline.

use crate::client::TimetableClient;
use crate::config::Config;
use crate::db::models::{NewScheduleSlot, slot_colors, slot_status};
use crate::parser::ClassEvent;
use crate::schema;
use crate::services::sync;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::PgConnection;
use diesel::prelude::*;
use log::{info, warn};
use std::collections::BTreeMap;

/// One slot before the owning room/day is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDraft {
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub status: String,
    pub title: Option<String>,
    pub teacher: Option<String>,
    pub class_name: Option<String>,
    pub external_id: Option<String>,
    pub color: String,
}

impl SlotDraft {
    fn free(starts_at: NaiveDateTime, ends_at: NaiveDateTime) -> Self {
        SlotDraft {
            starts_at,
            ends_at,
            status: slot_status::FREE.to_string(),
            title: None,
            teacher: None,
            class_name: None,
            external_id: None,
            color: slot_colors::FREE.to_string(),
        }
    }

    fn busy(ev: &ClassEvent) -> Self {
        SlotDraft {
            starts_at: ev.starts_at,
            ends_at: ev.ends_at,
            status: slot_status::BUSY.to_string(),
            title: Some(ev.title.clone()),
            teacher: Some(ev.teacher.clone()),
            class_name: ev.class_name.clone(),
            external_id: Some(ev.external_id.clone()),
            color: ev.color.clone(),
        }
    }

    fn into_row(self, room_id: i64, day: NaiveDate) -> NewScheduleSlot {
        NewScheduleSlot {
            room_id,
            day,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            status: self.status,
            title: self.title,
            teacher: self.teacher,
            class_name: self.class_name,
            external_id: self.external_id,
            color: self.color,
        }
    }
}

/// Rebuild all timelines of a building from parsed events. When no handoff
/// is provided (or it is empty), the sync service is triggered first.
/// Returns the number of slots inserted.
pub fn generate_for_building(
    conn: &mut PgConnection,
    cfg: &Config,
    client: Option<&TimetableClient>,
    building_code: &str,
    handoff: Option<Vec<ClassEvent>>,
) -> Result<usize, String> {
    let code = building_code.trim().to_ascii_uppercase();

    let events = match handoff {
        Some(events) if !events.is_empty() => events,
        _ => sync::sync_building(conn, client, &code)?.events,
    };
    if events.is_empty() {
        info!("Timeline: {}: no events available; nothing to regenerate", code);
        return Ok(0);
    }

    let db_building_id: i64 = {
        use schema::buildings::dsl as B;
        B::buildings
            .filter(B::code.eq(&code))
            .select(B::id)
            .first(conn)
            .map_err(|e| format!("fetch building id failed: {}", e))?
    };

    let rooms: Vec<(i64, String)> = {
        use schema::rooms::dsl as R;
        R::rooms
            .filter(R::building_id.eq(db_building_id))
            .select((R::id, R::full_code))
            .load(conn)
            .map_err(|e| format!("fetch rooms failed: {}", e))?
    };

    // Events bucketed per room per day, ordered by start. The sort is stable,
    // so events sharing a start time keep their feed order; the later one is
    // then dropped by the cursor guard below. Known limitation, no tie-break.
    let mut by_room: BTreeMap<&str, BTreeMap<NaiveDate, Vec<&ClassEvent>>> = BTreeMap::new();
    for ev in &events {
        by_room
            .entry(ev.room_code.as_str())
            .or_default()
            .entry(ev.starts_at.date())
            .or_default()
            .push(ev);
    }
    for days in by_room.values_mut() {
        for list in days.values_mut() {
            list.sort_by_key(|e| e.starts_at);
        }
    }

    let first_day = match events.iter().map(|e| e.starts_at.date()).min() {
        Some(d) => d,
        None => return Ok(0),
    };
    let last_day = events.iter().map(|e| e.starts_at.date()).max().unwrap_or(first_day);

    let mut days_regenerated = 0usize;
    let mut skipped_events = 0usize;
    let inserted = conn
        .transaction::<usize, diesel::result::Error, _>(|conn| {
            use schema::schedule_slots::dsl as S;

            let empty: Vec<&ClassEvent> = Vec::new();
            let mut inserted = 0usize;
            for day in first_day.iter_days() {
                if day > last_day {
                    break;
                }
                days_regenerated += 1;
                for (room_id, room_code) in &rooms {
                    diesel::delete(S::schedule_slots.filter(S::room_id.eq(room_id).and(S::day.eq(day))))
                        .execute(conn)?;

                    let day_events = by_room
                        .get(room_code.as_str())
                        .and_then(|days| days.get(&day))
                        .unwrap_or(&empty);
                    let (drafts, skipped) =
                        build_day_slots(day, cfg.day_window_start, cfg.day_window_end, day_events);
                    skipped_events += skipped;

                    let rows: Vec<NewScheduleSlot> =
                        drafts.into_iter().map(|d| d.into_row(*room_id, day)).collect();
                    inserted += diesel::insert_into(S::schedule_slots).values(&rows).execute(conn)?;
                }
            }
            Ok(inserted)
        })
        .map_err(|e| format!("timeline regeneration failed: {}", e))?;

    if skipped_events > 0 {
        warn!(
            "Timeline: {}: skipped {} out-of-order or zero-length event(s)",
            code, skipped_events
        );
    }
    info!(
        "Timeline: {}: regenerated {} day(s) x {} room(s), {} slot(s) inserted",
        code,
        days_regenerated,
        rooms.len(),
        inserted
    );
    Ok(inserted)
}

/// Walk one room's events for one day and fill the day window with a
/// contiguous FREE/BUSY partition. `events` must be sorted by start time.
/// Returns the drafts plus the count of events dropped by the cursor guard.
pub fn build_day_slots(
    day: NaiveDate,
    window_start: NaiveTime,
    window_end: NaiveTime,
    events: &[&ClassEvent],
) -> (Vec<SlotDraft>, usize) {
    let window_start_dt = day.and_time(window_start);
    let window_end_dt = day.and_time(window_end);

    let mut drafts = Vec::new();
    let mut cursor = window_start_dt;
    let mut skipped = 0usize;
    for ev in events {
        // Starts behind the cursor (overlap or pre-window) or cannot be
        // stored as a valid interval: drop, the feed is assumed clean.
        if ev.starts_at < cursor || ev.ends_at <= ev.starts_at {
            skipped += 1;
            continue;
        }
        if ev.starts_at > cursor {
            drafts.push(SlotDraft::free(cursor, ev.starts_at));
        }
        drafts.push(SlotDraft::busy(ev));
        cursor = ev.ends_at;
    }
    if cursor < window_end_dt {
        drafts.push(SlotDraft::free(cursor, window_end_dt));
    }
    (drafts, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn event(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> ClassEvent {
        ClassEvent {
            external_id: "1".to_string(),
            building: "AP152".to_string(),
            room_code: "AP152.EG.108".to_string(),
            floor: "EG".to_string(),
            number: "108".to_string(),
            title: "Analysis 1".to_string(),
            teacher: "Musterfrau M.".to_string(),
            class_name: None,
            color: "#123456".to_string(),
            starts_at: day().and_time(t(start_h, start_m)),
            ends_at: day().and_time(t(end_h, end_m)),
        }
    }

    fn assert_partition(drafts: &[SlotDraft], window_start: NaiveTime, window_end: NaiveTime) {
        assert!(!drafts.is_empty());
        assert_eq!(drafts[0].starts_at, day().and_time(window_start));
        assert_eq!(drafts.last().unwrap().ends_at, day().and_time(window_end));
        for pair in drafts.windows(2) {
            assert_eq!(pair[0].ends_at, pair[1].starts_at, "gap or overlap in partition");
        }
        for d in drafts {
            assert!(d.starts_at < d.ends_at);
        }
    }

    #[test]
    fn empty_day_yields_single_free_slot() {
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[]);
        assert_eq!(skipped, 0);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].status, slot_status::FREE);
        assert_partition(&drafts, t(8, 0), t(18, 15));
    }

    #[test]
    fn events_are_interleaved_with_free_gaps() {
        let a = event(9, 0, 10, 30);
        let b = event(12, 0, 13, 0);
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a, &b]);
        assert_eq!(skipped, 0);
        assert_partition(&drafts, t(8, 0), t(18, 15));

        let statuses: Vec<&str> = drafts.iter().map(|d| d.status.as_str()).collect();
        assert_eq!(
            statuses,
            vec![
                slot_status::FREE,
                slot_status::BUSY,
                slot_status::FREE,
                slot_status::BUSY,
                slot_status::FREE,
            ]
        );
        assert_eq!(drafts[1].title.as_deref(), Some("Analysis 1"));
        assert_eq!(drafts[1].external_id.as_deref(), Some("1"));
        assert_eq!(drafts[2].starts_at, day().and_time(t(10, 30)));
        assert_eq!(drafts[2].ends_at, day().and_time(t(12, 0)));
    }

    #[test]
    fn event_at_window_boundaries_suppresses_free_fill() {
        let a = event(8, 0, 9, 0);
        let b = event(17, 0, 18, 15);
        let (drafts, _) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a, &b]);
        assert_partition(&drafts, t(8, 0), t(18, 15));
        assert_eq!(drafts.first().unwrap().status, slot_status::BUSY);
        assert_eq!(drafts.last().unwrap().status, slot_status::BUSY);
    }

    #[test]
    fn overlapping_event_is_dropped() {
        let a = event(9, 0, 11, 0);
        let b = event(10, 0, 12, 0);
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a, &b]);
        assert_eq!(skipped, 1);
        assert_partition(&drafts, t(8, 0), t(18, 15));
        assert_eq!(drafts.iter().filter(|d| d.status == slot_status::BUSY).count(), 1);
    }

    #[test]
    fn equal_start_keeps_first_event_only() {
        let a = event(9, 0, 10, 0);
        let mut b = event(9, 0, 11, 0);
        b.title = "Second".to_string();
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a, &b]);
        assert_eq!(skipped, 1);
        let busy: Vec<&SlotDraft> = drafts.iter().filter(|d| d.status == slot_status::BUSY).collect();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].title.as_deref(), Some("Analysis 1"));
    }

    #[test]
    fn zero_length_event_is_dropped() {
        let a = event(9, 0, 9, 0);
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a]);
        assert_eq!(skipped, 1);
        assert_eq!(drafts.len(), 1);
        assert_partition(&drafts, t(8, 0), t(18, 15));
    }

    #[test]
    fn pre_window_event_is_dropped() {
        let a = event(6, 0, 7, 0);
        let (drafts, skipped) = build_day_slots(day(), t(8, 0), t(18, 15), &[&a]);
        assert_eq!(skipped, 1);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].status, slot_status::FREE);
    }
}
