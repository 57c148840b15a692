//! Diesel model structs representing buildings, rooms, raw upstream payloads
//! and the derived per-room schedule slots.
//!
//! Schedule instants (`starts_at`/`ends_at`) are naive local datetimes in the
//! configured civil timezone; only bookkeeping columns are UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

// Standardized values for `schedule_slots.status`.
pub mod slot_status {
    pub const FREE: &str = "FREE";
    pub const BUSY: &str = "BUSY";
}

// Display colors for slots whose upstream event carries none.
pub mod slot_colors {
    pub const FREE: &str = "#81c784";
    pub const BUSY_DEFAULT: &str = "#e57373";
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::buildings)]
pub struct Building {
    pub id: i64,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::buildings)]
pub struct NewBuilding {
    pub code: String,
}

// raw_payloads is write-mostly; reads select the fingerprint column directly.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::raw_payloads)]
pub struct NewRawPayload {
    pub building_id: i64,
    pub content: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::rooms)]
#[diesel(belongs_to(Building))]
pub struct Room {
    pub id: i64,
    pub building_id: i64,
    pub floor: String,
    pub number: String,
    pub full_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::rooms)]
pub struct NewRoom {
    pub building_id: i64,
    pub floor: String,
    pub number: String,
    pub full_code: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::schedule_slots)]
#[diesel(belongs_to(Room))]
pub struct ScheduleSlot {
    pub id: i64,
    pub room_id: i64,
    pub day: NaiveDate,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub status: String,
    pub title: Option<String>,
    pub teacher: Option<String>,
    pub class_name: Option<String>,
    pub external_id: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::schedule_slots)]
pub struct NewScheduleSlot {
    pub room_id: i64,
    pub day: NaiveDate,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub status: String,
    pub title: Option<String>,
    pub teacher: Option<String>,
    pub class_name: Option<String>,
    pub external_id: Option<String>,
    pub color: String,
}

impl ScheduleSlot {
    pub fn is_free(&self) -> bool {
        self.status == slot_status::FREE
    }

    pub fn is_busy(&self) -> bool {
        self.status == slot_status::BUSY
    }
}
