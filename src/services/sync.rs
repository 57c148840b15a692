//! Change-detecting sync of one building's timetable feed.
//!
//! The feed is fingerprinted before any parsing, so an unchanged upstream
//! costs a single SELECT plus one hash. Upstream and configuration failures
//! are absorbed here and reduced to a zero-event outcome; only storage
//! failures propagate.

use crate::client::TimetableClient;
use crate::db::models as dbm;
use crate::models::timetable::RawEvent;
use crate::parser::{self, ClassEvent, ParseOutcome};
use crate::schema;
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Result of one sync cycle; `events` is the in-process handoff consumed by
/// the timeline generator in the same cycle.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub changed: bool,
    pub processed: usize,
    pub events: Vec<ClassEvent>,
}

pub fn sync_building(
    conn: &mut PgConnection,
    client: Option<&TimetableClient>,
    building_code: &str,
) -> Result<SyncOutcome, String> {
    let code = building_code.trim().to_ascii_uppercase();

    let Some(client) = client else {
        warn!("Sync: {}: TIMETABLE_BASE_URL not configured; skipping", code);
        return Ok(SyncOutcome::default());
    };

    let body = match client.get_building_feed(&code) {
        Ok(b) => b,
        Err(e) => {
            warn!("Sync: {}: feed request failed: {}", code, e);
            return Ok(SyncOutcome::default());
        }
    };

    let fingerprint = content_fingerprint(&body);
    let db_building_id = ensure_building(conn, &code)?;

    let stored: Option<String> = {
        use schema::raw_payloads::dsl as P;
        P::raw_payloads
            .filter(P::building_id.eq(db_building_id))
            .select(P::fingerprint)
            .first(conn)
            .optional()
            .map_err(|e| format!("fetch stored fingerprint failed: {}", e))?
    };
    if stored.as_deref() == Some(fingerprint.as_str()) {
        debug!("Sync: {}: feed unchanged (fingerprint match)", code);
        return Ok(SyncOutcome::default());
    }

    // Validate the payload shape before the fingerprint is persisted, so a
    // malformed body never poisons change detection for the next cycle.
    let raw_events = match parse_feed(&body) {
        Ok(events) => events,
        Err(e) => {
            warn!("Sync: {}: malformed feed payload: {}", code, e);
            return Ok(SyncOutcome::default());
        }
    };

    store_payload(conn, db_building_id, &body, &fingerprint)?;

    let mut events = Vec::new();
    let mut skipped = 0usize;
    let mut foreign = 0usize;
    for raw in &raw_events {
        match parser::parse_event(raw, &code) {
            ParseOutcome::Event(ev) => events.push(ev),
            ParseOutcome::Skipped => skipped += 1,
            ParseOutcome::ForeignBuilding => foreign += 1,
        }
    }
    register_rooms(conn, db_building_id, &events)?;

    if foreign > 0 {
        warn!("Sync: {}: dropped {} event(s) from other buildings", code, foreign);
    }
    info!(
        "Sync: {}: feed changed; {} event(s) parsed, {} skipped as noise",
        code,
        events.len(),
        skipped
    );

    Ok(SyncOutcome {
        changed: true,
        processed: events.len(),
        events,
    })
}

/// SHA-256 over the raw response body, hex-encoded.
fn content_fingerprint(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// The feed must be a flat JSON array of events; anything else is malformed.
fn parse_feed(body: &str) -> Result<Vec<RawEvent>, String> {
    let mut de = serde_json::Deserializer::from_str(body);
    let parsed: Result<Vec<RawEvent>, _> = serde_path_to_error::deserialize(&mut de);
    parsed.map_err(|e| format!("at {}: {}", e.path(), e.inner()))
}

fn ensure_building(conn: &mut PgConnection, code: &str) -> Result<i64, String> {
    use schema::buildings::dsl as B;

    diesel::insert_into(B::buildings)
        .values(&dbm::NewBuilding { code: code.to_string() })
        .on_conflict(B::code)
        .do_update()
        .set(B::updated_at.eq(Utc::now()))
        .execute(conn)
        .map_err(|e| format!("upsert building failed: {}", e))?;

    let building: dbm::Building = B::buildings
        .filter(B::code.eq(code))
        .first(conn)
        .map_err(|e| format!("fetch building failed: {}", e))?;
    Ok(building.id)
}

fn store_payload(conn: &mut PgConnection, db_building_id: i64, content: &str, fingerprint: &str) -> Result<(), String> {
    use schema::raw_payloads::dsl as P;

    let new_row = dbm::NewRawPayload {
        building_id: db_building_id,
        content: content.to_string(),
        fingerprint: fingerprint.to_string(),
    };
    diesel::insert_into(P::raw_payloads)
        .values(&new_row)
        .on_conflict(P::building_id)
        .do_update()
        .set((
            P::content.eq(new_row.content.clone()),
            P::fingerprint.eq(new_row.fingerprint.clone()),
            P::fetched_at.eq(Utc::now()),
        ))
        .execute(conn)
        .map_err(|e| format!("store raw payload failed: {}", e))?;
    Ok(())
}

/// Insert any room the parsed events reference that is not yet known.
/// Existing rooms are left untouched; floor and number are immutable.
fn register_rooms(conn: &mut PgConnection, db_building_id: i64, events: &[ClassEvent]) -> Result<(), String> {
    use schema::rooms::dsl as R;

    let mut seen: BTreeMap<&str, &ClassEvent> = BTreeMap::new();
    for ev in events {
        seen.entry(ev.room_code.as_str()).or_insert(ev);
    }

    let rows: Vec<dbm::NewRoom> = seen
        .values()
        .map(|ev| dbm::NewRoom {
            building_id: db_building_id,
            floor: ev.floor.clone(),
            number: ev.number.clone(),
            full_code: ev.room_code.clone(),
        })
        .collect();
    if rows.is_empty() {
        return Ok(());
    }

    diesel::insert_into(R::rooms)
        .values(&rows)
        .on_conflict((R::building_id, R::full_code))
        .do_nothing()
        .execute(conn)
        .map_err(|e| format!("register rooms failed: {}", e))?;
    Ok(())
}
