use crate::config::{GenericTreatment, TreatmentTables};
use crate::domain::model::{
    minutes_between, CanonicalSlot, ClinicPayload, DateWindow, DayAvailability, FirstAvailableHint,
    RawOpening, SlotStatus,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::{BTreeMap, HashMap};

/// 把多個治療項目的 openings 合併成依日期分組、去重後的時段
pub struct SlotNormalizer<'a> {
    clinic_id: &'a str,
    payload: &'a ClinicPayload,
    tables: &'a TreatmentTables,
    generic: &'a GenericTreatment,
}

impl<'a> SlotNormalizer<'a> {
    pub fn new(
        clinic_id: &'a str,
        payload: &'a ClinicPayload,
        tables: &'a TreatmentTables,
        generic: &'a GenericTreatment,
    ) -> Self {
        Self {
            clinic_id,
            payload,
            tables,
            generic,
        }
    }

    /// 日期遞增；同一天內依開始時間遞增。
    /// 沒有任何時段但有最早可預約日提示時，回傳單一筆備援日。
    pub fn normalize(
        &self,
        openings: &[RawOpening],
        window: Option<DateWindow>,
        first_available: Option<FirstAvailableHint>,
    ) -> Vec<DayAvailability> {
        let mut by_date: BTreeMap<NaiveDate, Vec<&RawOpening>> = BTreeMap::new();
        let mut outside_window = 0usize;

        for opening in openings {
            if opening.end_at <= opening.start_at {
                tracing::warn!(
                    "🔶 {}: dropping opening with non-positive length at {}",
                    self.clinic_id,
                    opening.start_at
                );
                continue;
            }
            let date = opening.start_at.date();
            if window.is_some_and(|w| !w.contains(date)) {
                outside_window += 1;
                continue;
            }
            by_date.entry(date).or_default().push(opening);
        }

        if outside_window > 0 {
            tracing::debug!(
                "🔄 {}: ignored {} openings outside the requested window",
                self.clinic_id,
                outside_window
            );
        }

        let days: Vec<DayAvailability> = by_date
            .into_iter()
            .map(|(date, group)| {
                let mut kept = dedup_by_start(group);
                kept.sort_by_key(|o| o.start_at);
                let slots = kept.into_iter().map(|o| self.to_slot(o)).collect();
                DayAvailability::new(date, slots, false)
            })
            .collect();

        if days.is_empty() {
            if let Some(hint) = first_available {
                tracing::debug!(
                    "🔄 {}: no openings in window, using first available date {}",
                    self.clinic_id,
                    hint.date
                );
                return vec![self.fallback_day(hint)];
            }
        }

        days
    }

    fn to_slot(&self, opening: &RawOpening) -> CanonicalSlot {
        let duration_minutes = minutes_between(opening.start_at, opening.end_at);
        if let Some(declared) = opening.declared_duration_minutes {
            if declared != duration_minutes {
                tracing::debug!(
                    "🔄 {}: upstream declared {} min for {} but span is {} min",
                    self.clinic_id,
                    declared,
                    opening.start_at,
                    duration_minutes
                );
            }
        }

        let (treatment_name, price) = self.resolve_display(opening.treatment_id);
        CanonicalSlot {
            start: opening.start_at,
            end: Some(opening.end_at),
            duration_minutes,
            status: if opening.status.is_open() {
                SlotStatus::Available
            } else {
                SlotStatus::Unavailable
            },
            treatment_name,
            price,
            treatment_id: opening.treatment_id,
            start_time_known: true,
        }
    }

    fn fallback_day(&self, hint: FirstAvailableHint) -> DayAvailability {
        let start: NaiveDateTime = hint.date.and_time(hint.time.unwrap_or(NaiveTime::MIN));
        let slot = CanonicalSlot {
            start,
            end: None,
            duration_minutes: self.generic.duration_minutes,
            status: SlotStatus::Available,
            treatment_name: self.generic.name.clone(),
            price: self.generic.price,
            treatment_id: None,
            start_time_known: hint.time.is_some(),
        };
        DayAvailability::new(hint.date, vec![slot], true)
    }

    /// 名稱與價格各自依序查：頁面目錄、診所查找表、通用預設
    pub fn resolve_display(&self, treatment_id: Option<u64>) -> (String, Option<f64>) {
        let catalog = treatment_id
            .and_then(|id| self.payload.treatment(id))
            .filter(|t| !t.placeholder);
        let lookup = treatment_id.and_then(|id| self.tables.lookup(self.clinic_id, id));

        let name = catalog
            .map(|t| t.name.clone())
            .or_else(|| lookup.map(|l| l.name.clone()))
            .unwrap_or_else(|| self.generic.name.clone());
        let price = catalog
            .and_then(|t| t.price)
            .or_else(|| lookup.and_then(|l| l.price))
            .or(self.generic.price);

        (name, price)
    }
}

/// 以開始時間去重；同一時間有 open 狀態時保留 open，否則保留先出現者
fn dedup_by_start(group: Vec<&RawOpening>) -> Vec<&RawOpening> {
    let mut kept: Vec<&RawOpening> = Vec::with_capacity(group.len());
    let mut index: HashMap<NaiveDateTime, usize> = HashMap::new();

    for opening in group {
        match index.get(&opening.start_at) {
            Some(&i) => {
                if !kept[i].status.is_open() && opening.status.is_open() {
                    kept[i] = opening;
                }
            }
            None => {
                index.insert(opening.start_at, kept.len());
                kept.push(opening);
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        parse_upstream_timestamp, OpeningStatus, ParseQuality, TreatmentOffering,
    };
    use std::collections::HashSet;

    fn opening(start: &str, end: &str, status: &str, treatment_id: u64) -> RawOpening {
        RawOpening {
            start_at: parse_upstream_timestamp(start).unwrap(),
            end_at: parse_upstream_timestamp(end).unwrap(),
            status: OpeningStatus::parse(status),
            treatment_id: Some(treatment_id),
            declared_duration_minutes: None,
        }
    }

    fn catalog_payload() -> ClinicPayload {
        let mut payload = ClinicPayload::empty(ParseQuality::Full);
        payload.treatments = vec![TreatmentOffering {
            id: 1,
            name: "RMT Massage 60 min".to_string(),
            duration_seconds: Some(3600),
            price: Some(120.0),
            practitioner_ids: None,
            category_id: None,
            placeholder: false,
        }];
        payload
    }

    fn window() -> Option<DateWindow> {
        Some(DateWindow::new(NaiveDate::from_ymd_opt(2025, 7, 23).unwrap(), 7))
    }

    #[test]
    fn test_single_opening_becomes_available_slot() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let days = normalizer.normalize(
            &[opening("2025-07-23T09:00:00", "2025-07-23T10:00:00", "opening", 1)],
            window(),
            None,
        );

        assert_eq!(days.len(), 1);
        assert!(!days[0].is_fallback);
        assert_eq!(days[0].day_of_week, "Wednesday");
        let slot = &days[0].slots[0];
        assert_eq!(slot.duration_minutes, 60);
        assert!(slot.is_available());
        assert_eq!(slot.treatment_name, "RMT Massage 60 min");
        assert_eq!(slot.price, Some(120.0));
    }

    #[test]
    fn test_open_status_wins_on_shared_start() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let booked_first = normalizer.normalize(
            &[
                opening("2025-07-23T09:00:00", "2025-07-23T10:30:00", "booked", 9),
                opening("2025-07-23T09:00:00", "2025-07-23T10:00:00", "opening", 1),
            ],
            window(),
            None,
        );
        let open_first = normalizer.normalize(
            &[
                opening("2025-07-23T09:00:00", "2025-07-23T10:00:00", "opening", 1),
                opening("2025-07-23T09:00:00", "2025-07-23T10:30:00", "booked", 9),
            ],
            window(),
            None,
        );

        for days in [booked_first, open_first] {
            assert_eq!(days[0].slots.len(), 1);
            assert!(days[0].slots[0].is_available());
            assert_eq!(days[0].slots[0].treatment_id, Some(1));
        }
    }

    #[test]
    fn test_duration_ignores_declared_value() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let mut raw = opening("2025-07-24T13:00:00", "2025-07-24T13:45:00", "opening", 1);
        raw.declared_duration_minutes = Some(60);
        let days = normalizer.normalize(&[raw], window(), None);

        assert_eq!(days[0].slots[0].duration_minutes, 45);
    }

    #[test]
    fn test_dedup_and_duration_invariants_hold_for_generated_sets() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);
        let base = parse_upstream_timestamp("2025-07-23T08:00:00").unwrap();

        // 固定種子的線性同餘產生器
        let mut seed: u64 = 42;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        for _ in 0..50 {
            let count = next(40) as usize + 1;
            let openings: Vec<RawOpening> = (0..count)
                .map(|_| {
                    let start = base
                        + chrono::Duration::days(next(6) as i64)
                        + chrono::Duration::minutes(15 * next(16) as i64);
                    let end = start + chrono::Duration::minutes(15 * (next(8) as i64 + 1));
                    RawOpening {
                        start_at: start,
                        end_at: end,
                        status: if next(2) == 0 {
                            OpeningStatus::Open
                        } else {
                            OpeningStatus::Booked
                        },
                        treatment_id: Some(next(3) + 1),
                        declared_duration_minutes: Some(next(120) as i64),
                    }
                })
                .collect();

            let days = normalizer.normalize(&openings, window(), None);

            let mut previous_date = None;
            for day in &days {
                assert!(previous_date < Some(day.date));
                previous_date = Some(day.date);

                let mut starts = HashSet::new();
                for pair in day.slots.windows(2) {
                    assert!(pair[0].start < pair[1].start);
                }
                for slot in &day.slots {
                    assert!(starts.insert(slot.start));
                    let end = slot.end.unwrap();
                    let expected = ((end - slot.start).num_milliseconds() as f64 / 60000.0).round() as i64;
                    assert_eq!(slot.duration_minutes, expected);

                    let any_open = openings
                        .iter()
                        .any(|o| o.start_at == slot.start && o.status.is_open());
                    assert_eq!(slot.is_available(), any_open);
                }
            }
        }
    }

    #[test]
    fn test_days_and_slots_sorted() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let days = normalizer.normalize(
            &[
                opening("2025-07-25T15:00:00", "2025-07-25T16:00:00", "opening", 1),
                opening("2025-07-23T11:00:00", "2025-07-23T12:00:00", "opening", 1),
                opening("2025-07-23T09:00:00", "2025-07-23T10:00:00", "opening", 1),
            ],
            window(),
            None,
        );

        let dates: Vec<String> = days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, vec!["2025-07-23", "2025-07-25"]);
        assert_eq!(days[0].slots[0].start.to_string(), "2025-07-23 09:00:00");
        assert_eq!(days[0].slots[1].start.to_string(), "2025-07-23 11:00:00");
    }

    #[test]
    fn test_fallback_day_from_hint() {
        let payload = ClinicPayload::empty(ParseQuality::Full);
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let hint = FirstAvailableHint::parse("2025-08-04").unwrap();
        let days = normalizer.normalize(&[], window(), Some(hint));

        assert_eq!(days.len(), 1);
        assert!(days[0].is_fallback);
        assert_eq!(days[0].date, hint.date);
        let slot = &days[0].slots[0];
        assert!(slot.end.is_none());
        assert!(!slot.start_time_known);
        assert_eq!(slot.duration_minutes, generic.duration_minutes);
        assert_eq!(slot.treatment_name, generic.name);

        let timed = normalizer.normalize(
            &[],
            window(),
            FirstAvailableHint::parse("2025-08-04T14:30:00"),
        );
        assert!(timed[0].slots[0].start_time_known);
        assert_eq!(timed[0].slots[0].start.to_string(), "2025-08-04 14:30:00");
    }

    #[test]
    fn test_no_hint_means_no_days() {
        let payload = ClinicPayload::empty(ParseQuality::Full);
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        assert!(normalizer.normalize(&[], window(), None).is_empty());
    }

    #[test]
    fn test_openings_outside_window_are_dropped() {
        let payload = catalog_payload();
        let tables = TreatmentTables::default();
        let generic = GenericTreatment::default();
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        let days = normalizer.normalize(
            &[
                opening("2025-07-22T09:00:00", "2025-07-22T10:00:00", "opening", 1),
                opening("2025-07-30T09:00:00", "2025-07-30T10:00:00", "opening", 1),
            ],
            window(),
            FirstAvailableHint::parse("2025-08-01"),
        );

        assert_eq!(days.len(), 1);
        assert!(days[0].is_fallback);
    }

    #[test]
    fn test_display_resolution_chain() {
        let mut payload = catalog_payload();
        payload.treatments.push(TreatmentOffering::placeholder(9));
        let tables = TreatmentTables::default()
            .with_lookup("downtown", 9, "RMT Massage 90 min", Some(165.0))
            .with_lookup("uptown", 14, "Other clinic", Some(1.0));
        let generic = GenericTreatment {
            name: "Massage Therapy".to_string(),
            duration_minutes: 60,
            price: Some(100.0),
        };
        let normalizer = SlotNormalizer::new("downtown", &payload, &tables, &generic);

        assert_eq!(
            normalizer.resolve_display(Some(1)),
            ("RMT Massage 60 min".to_string(), Some(120.0))
        );
        // 佔位紀錄不提供名稱，改用查找表
        assert_eq!(
            normalizer.resolve_display(Some(9)),
            ("RMT Massage 90 min".to_string(), Some(165.0))
        );
        assert_eq!(
            normalizer.resolve_display(Some(14)),
            ("Massage Therapy".to_string(), Some(100.0))
        );
        assert_eq!(
            normalizer.resolve_display(None),
            ("Massage Therapy".to_string(), Some(100.0))
        );
    }
}
