use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 診所來源（由外部配置提供，引擎只讀）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicSource {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ClinicSource {
    pub fn new(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
        }
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: u64,
    pub clinic_id: String,
    pub name: String,
    pub credentials: Option<String>,
    pub specialties: Vec<String>,
    pub booking_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentOffering {
    pub id: u64,
    pub name: String,
    pub duration_seconds: Option<u64>,
    pub price: Option<f64>,
    /// `None` 表示頁面沒有提供員工指派資訊，視為所有治療師皆可執行
    pub practitioner_ids: Option<BTreeSet<u64>>,
    pub category_id: Option<u64>,
    /// 由 id 掃描合成的佔位紀錄
    pub placeholder: bool,
}

impl TreatmentOffering {
    pub fn placeholder(id: u64) -> Self {
        Self {
            id,
            name: format!("Treatment {}", id),
            duration_seconds: None,
            price: None,
            practitioner_ids: None,
            category_id: None,
            placeholder: true,
        }
    }

    pub fn is_eligible(&self, practitioner_id: u64) -> bool {
        match &self.practitioner_ids {
            Some(ids) => ids.contains(&practitioner_id),
            None => true,
        }
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        self.duration_seconds.map(|s| (s as i64 + 30) / 60)
    }
}

/// 治療類別（頁面中的 disciplines）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// 配置區塊的解析品質，讓呼叫端判斷資料可信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseQuality {
    /// 所有找到的子陣列都成功解碼
    Full,
    /// 部分子陣列解碼失敗，保留成功的部分
    Partial,
    /// treatments 解碼失敗，只從 `"id": n` 還原出佔位紀錄
    IdsOnly,
    /// 找不到配置區塊
    NotFound,
}

impl ParseQuality {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, ParseQuality::Full)
    }
}

/// 從診所頁面擷取出的名冊與目錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicPayload {
    pub practitioners: Vec<Practitioner>,
    pub treatments: Vec<TreatmentOffering>,
    pub categories: Vec<Category>,
    pub quality: ParseQuality,
    pub diagnostics: Vec<String>,
}

impl ClinicPayload {
    pub fn empty(quality: ParseQuality) -> Self {
        Self {
            practitioners: Vec::new(),
            treatments: Vec::new(),
            categories: Vec::new(),
            quality,
            diagnostics: Vec::new(),
        }
    }

    pub fn treatment(&self, id: u64) -> Option<&TreatmentOffering> {
        self.treatments.iter().find(|t| t.id == id)
    }

    pub fn practitioner(&self, id: u64) -> Option<&Practitioner> {
        self.practitioners.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpeningStatus {
    Open,
    Booked,
    Other(String),
}

impl OpeningStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "opening" | "open" | "available" => OpeningStatus::Open,
            "booked" | "unavailable" | "taken" => OpeningStatus::Booked,
            other => OpeningStatus::Other(other.to_string()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OpeningStatus::Open)
    }
}

/// 上游回傳的單筆 opening，只在正規化階段短暫存在
#[derive(Debug, Clone, PartialEq)]
pub struct RawOpening {
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: OpeningStatus,
    pub treatment_id: Option<u64>,
    /// 上游宣告的長度，僅供記錄，永遠不會寫進 CanonicalSlot
    pub declared_duration_minutes: Option<i64>,
}

/// 上游治療師摘要中的「最早可預約日」提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstAvailableHint {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl FirstAvailableHint {
    /// 接受 `YYYY-MM-DD` 或帶時間的時間戳
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(ts) = parse_upstream_timestamp(raw) {
            return Some(Self {
                date: ts.date(),
                time: Some(ts.time()),
            });
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(|date| Self { date, time: None })
    }
}

/// 解析上游時間戳，保留診所當地時間（忽略時區偏移）
pub fn parse_upstream_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// 單一次可用性查詢的結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpeningsResponse {
    pub practitioner_name: Option<String>,
    pub first_available: Option<FirstAvailableHint>,
    pub openings: Vec<RawOpening>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSlot {
    pub start: NaiveDateTime,
    /// 由提示合成的備援時段沒有結束時間
    pub end: Option<NaiveDateTime>,
    pub duration_minutes: i64,
    pub status: SlotStatus,
    pub treatment_name: String,
    pub price: Option<f64>,
    pub treatment_id: Option<u64>,
    pub start_time_known: bool,
}

impl CanonicalSlot {
    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }
}

/// 依開始與結束時間計算分鐘數（四捨五入）
pub fn minutes_between(start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    let millis = (end - start).num_milliseconds();
    (millis as f64 / 60_000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub slots: Vec<CanonicalSlot>,
    pub is_fallback: bool,
}

impl DayAvailability {
    pub fn new(date: NaiveDate, slots: Vec<CanonicalSlot>, is_fallback: bool) -> Self {
        Self {
            date,
            day_of_week: weekday_label(date.weekday()).to_string(),
            slots,
            is_fallback,
        }
    }
}

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Real,
    None,
}

/// 給消費端顯示的資料可信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConfidence {
    Real,
    Fallback,
    None,
}

impl DataConfidence {
    pub fn describe(&self) -> &'static str {
        match self {
            DataConfidence::Real => "Live availability from the clinic's booking system",
            DataConfidence::Fallback => {
                "Earliest available date only; times and details may differ when booking"
            }
            DataConfidence::None => "No availability found for the requested dates",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PractitionerAvailability {
    pub practitioner: Practitioner,
    pub clinic_name: String,
    pub days: Vec<DayAvailability>,
    pub data_source: DataSource,
}

impl PractitionerAvailability {
    /// data_source 由內容決定：只要有任何非備援時段就是 `real`
    pub fn new(practitioner: Practitioner, clinic_name: &str, days: Vec<DayAvailability>) -> Self {
        let has_genuine = days.iter().any(|d| !d.is_fallback && !d.slots.is_empty());
        Self {
            practitioner,
            clinic_name: clinic_name.to_string(),
            days,
            data_source: if has_genuine {
                DataSource::Real
            } else {
                DataSource::None
            },
        }
    }

    pub fn none(practitioner: Practitioner, clinic_name: &str) -> Self {
        Self::new(practitioner, clinic_name, Vec::new())
    }

    pub fn genuine_slots(&self) -> impl Iterator<Item = &CanonicalSlot> {
        self.days
            .iter()
            .filter(|d| !d.is_fallback)
            .flat_map(|d| d.slots.iter())
    }

    pub fn confidence(&self) -> DataConfidence {
        match self.data_source {
            DataSource::Real => DataConfidence::Real,
            DataSource::None if self.days.iter().any(|d| d.is_fallback) => DataConfidence::Fallback,
            DataSource::None => DataConfidence::None,
        }
    }
}

/// 查詢時間窗 `[start, start + num_days)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub num_days: u32,
}

impl DateWindow {
    pub fn new(start: NaiveDate, num_days: u32) -> Self {
        Self { start, num_days }
    }

    /// 超出日期範圍時飽和為 `NaiveDate::MAX`
    pub fn end_exclusive(&self) -> NaiveDate {
        self.start
            .checked_add_days(chrono::Days::new(u64::from(self.num_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end_exclusive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn practitioner() -> Practitioner {
        Practitioner {
            id: 3,
            clinic_id: "downtown".to_string(),
            name: "Jordan Lee".to_string(),
            credentials: Some("RMT".to_string()),
            specialties: vec![],
            booking_link: "https://downtown.example.com/#/staff_member/3".to_string(),
        }
    }

    #[test]
    fn test_parse_upstream_timestamp_variants() {
        let naive = parse_upstream_timestamp("2025-07-23T09:00:00").unwrap();
        let offset = parse_upstream_timestamp("2025-07-23T09:00:00-04:00").unwrap();
        let short = parse_upstream_timestamp("2025-07-23T09:00").unwrap();
        assert_eq!(naive, offset);
        assert_eq!(naive, short);
        assert!(parse_upstream_timestamp("not a date").is_none());
    }

    #[test]
    fn test_first_available_hint_with_and_without_time() {
        let date_only = FirstAvailableHint::parse("2025-08-04").unwrap();
        assert_eq!(date_only.date, NaiveDate::from_ymd_opt(2025, 8, 4).unwrap());
        assert!(date_only.time.is_none());

        let with_time = FirstAvailableHint::parse("2025-08-04T10:15:00").unwrap();
        assert_eq!(with_time.time, NaiveTime::from_hms_opt(10, 15, 0));
    }

    #[test]
    fn test_opening_status_parse() {
        assert_eq!(OpeningStatus::parse("opening"), OpeningStatus::Open);
        assert_eq!(OpeningStatus::parse("Booked"), OpeningStatus::Booked);
        assert_eq!(
            OpeningStatus::parse("break"),
            OpeningStatus::Other("break".to_string())
        );
    }

    #[test]
    fn test_data_source_derived_from_days() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 23).unwrap();
        let fallback_slot = CanonicalSlot {
            start: date.and_hms_opt(0, 0, 0).unwrap(),
            end: None,
            duration_minutes: 60,
            status: SlotStatus::Available,
            treatment_name: "Massage Therapy".to_string(),
            price: None,
            treatment_id: None,
            start_time_known: false,
        };
        let fallback_only = PractitionerAvailability::new(
            practitioner(),
            "Downtown",
            vec![DayAvailability::new(date, vec![fallback_slot.clone()], true)],
        );
        assert_eq!(fallback_only.data_source, DataSource::None);
        assert_eq!(fallback_only.confidence(), DataConfidence::Fallback);
        assert_eq!(fallback_only.genuine_slots().count(), 0);

        let genuine = PractitionerAvailability::new(
            practitioner(),
            "Downtown",
            vec![DayAvailability::new(date, vec![fallback_slot], false)],
        );
        assert_eq!(genuine.data_source, DataSource::Real);
        assert_eq!(genuine.days[0].day_of_week, "Wednesday");

        let none = PractitionerAvailability::none(practitioner(), "Downtown");
        assert_eq!(none.confidence(), DataConfidence::None);
    }

    #[test]
    fn test_window_contains() {
        let window = DateWindow::new(NaiveDate::from_ymd_opt(2025, 7, 23).unwrap(), 2);
        assert!(window.contains(NaiveDate::from_ymd_opt(2025, 7, 24).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2025, 7, 25).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2025, 7, 22).unwrap()));
    }

    #[test]
    fn test_window_end_saturates_instead_of_overflowing() {
        let start = NaiveDate::from_ymd_opt(2025, 7, 23).unwrap();
        let window = DateWindow::new(start, u32::MAX);

        assert_eq!(window.end_exclusive(), NaiveDate::MAX);
        assert!(window.contains(NaiveDate::from_ymd_opt(2025, 7, 24).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2025, 7, 22).unwrap()));

        let empty = DateWindow::new(start, 0);
        assert!(!empty.contains(start));
    }

    #[test]
    fn test_minutes_between_rounds() {
        let start = parse_upstream_timestamp("2025-07-23T09:00:00").unwrap();
        let end = parse_upstream_timestamp("2025-07-23T09:44:40").unwrap();
        assert_eq!(minutes_between(start, end), 45);
    }
}
