//! Output shape handed to the outer API layer, one document per practitioner.

use crate::domain::model::{CanonicalSlot, DataSource, DayAvailability, PractitionerAvailability};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DISPLAY_TIME_FORMAT: &str = "%-I:%M %p";
const UNKNOWN_TIME_LABEL: &str = "First available";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub practitioner_id: u64,
    pub practitioner_name: String,
    pub clinic_name: String,
    pub availability: Vec<DayView>,
    pub data_source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub date: String,
    pub day_of_week: String,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub time: String,
    pub end_time: Option<String>,
    pub available: bool,
    pub duration_minutes: i64,
    pub treatment_name: String,
    pub price: Option<f64>,
    pub start_at: String,
    pub end_at: Option<String>,
    pub is_fallback: bool,
}

impl From<&PractitionerAvailability> for AvailabilityResponse {
    fn from(avail: &PractitionerAvailability) -> Self {
        Self {
            practitioner_id: avail.practitioner.id,
            practitioner_name: avail.practitioner.name.clone(),
            clinic_name: avail.clinic_name.clone(),
            availability: avail.days.iter().map(DayView::from).collect(),
            data_source: avail.data_source,
        }
    }
}

impl From<&DayAvailability> for DayView {
    fn from(day: &DayAvailability) -> Self {
        Self {
            date: day.date.format("%Y-%m-%d").to_string(),
            day_of_week: day.day_of_week.clone(),
            slots: day
                .slots
                .iter()
                .map(|slot| SlotView::from_slot(slot, day.is_fallback))
                .collect(),
        }
    }
}

impl SlotView {
    pub fn from_slot(slot: &CanonicalSlot, is_fallback: bool) -> Self {
        let time = if slot.start_time_known {
            format_display_time(slot.start)
        } else {
            UNKNOWN_TIME_LABEL.to_string()
        };

        Self {
            time,
            end_time: slot.end.map(format_display_time),
            available: slot.is_available(),
            duration_minutes: slot.duration_minutes,
            treatment_name: slot.treatment_name.clone(),
            price: slot.price,
            start_at: slot.start.format(TIMESTAMP_FORMAT).to_string(),
            end_at: slot.end.map(|e| e.format(TIMESTAMP_FORMAT).to_string()),
            is_fallback,
        }
    }
}

pub fn format_display_time(ts: NaiveDateTime) -> String {
    ts.format(DISPLAY_TIME_FORMAT).to_string()
}

/// `format_display_time` 的反向：配合日期還原到分鐘
pub fn parse_display_time(date: NaiveDate, text: &str) -> Option<NaiveDateTime> {
    NaiveTime::parse_from_str(text.trim(), "%I:%M %p")
        .ok()
        .map(|t| date.and_time(t))
}
