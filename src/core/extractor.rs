//! Pulls the clinic's treatment catalog and staff roster out of the inline
//! configuration script on its booking page.
//!
//! The block is located between a start and end marker, then each list
//! (`treatments`, `staff_members`, `disciplines`) is isolated by scanning for
//! its balanced closing bracket. Lists sit next to other keys inside the parent
//! object, so a greedy pattern would swallow the keys that follow.

use crate::config::ExtractorSettings;
use crate::domain::model::{
    Category, ClinicPayload, ClinicSource, ParseQuality, Practitioner, TreatmentOffering,
};
use crate::utils::error::{EngineError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// (關鍵字, 專長標籤, 是否需整字比對)
const SPECIALTY_KEYWORDS: &[(&str, &str, bool)] = &[
    ("rmt", "Massage Therapy", true),
    ("massage", "Massage Therapy", false),
    ("physio", "Physiotherapy", false),
    ("chiropract", "Chiropractic", false),
    ("acupunct", "Acupuncture", false),
    ("osteopath", "Osteopathy", false),
    ("naturopath", "Naturopathy", false),
    ("kinesiolog", "Kinesiology", false),
    ("prenatal", "Prenatal", false),
    ("pregnan", "Prenatal", false),
    ("sport", "Sports", false),
    ("deep tissue", "Deep Tissue", false),
    ("myofascial", "Myofascial Release", false),
    ("cupping", "Cupping", false),
];

/// 一個子陣列在配置區塊中的定位結果
#[derive(Debug, Clone, Copy, PartialEq)]
enum ArraySpan<'a> {
    /// 含外層方括號的完整陣列文字
    Balanced(&'a str),
    /// 找到開頭但沒有對應的結尾，內容延伸到區塊結束
    Unterminated(&'a str),
    Missing,
}

pub struct ConfigBlockExtractor {
    settings: ExtractorSettings,
    treatments_key: Regex,
    staff_key: Regex,
    disciplines_key: Regex,
    id_field: Regex,
    trailing_comma: Regex,
}

impl ConfigBlockExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self {
            settings,
            treatments_key: list_key_pattern("treatments"),
            staff_key: list_key_pattern("staff_members"),
            disciplines_key: list_key_pattern("disciplines"),
            id_field: Regex::new(r#"\\?"id\\?"\s*:\s*\\?"?(\d+)"#).expect("valid id pattern"),
            trailing_comma: Regex::new(r",(\s*[\]}])").expect("valid trailing comma pattern"),
        }
    }

    /// 擷取診所資料；任何失敗都轉成帶品質標記的結果，不會回傳錯誤
    pub fn extract(&self, html: &str, clinic: &ClinicSource) -> ClinicPayload {
        let block = match self.locate_block(html) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("🔶 {}: {}", clinic.id, e);
                let mut payload = ClinicPayload::empty(ParseQuality::NotFound);
                payload.diagnostics.push(e.to_string());
                return payload;
            }
        };

        let mut diagnostics = Vec::new();
        let mut quality = ParseQuality::Full;

        let treatments = match self.find_array(block, &self.treatments_key) {
            ArraySpan::Missing => {
                diagnostics.push("treatments list not found in configuration block".to_string());
                quality = ParseQuality::Partial;
                Vec::new()
            }
            span => match self.decode_span(span, "treatments") {
                Ok(items) => items.iter().filter_map(treatment_from_value).collect(),
                Err(e) => {
                    let ids = self.scan_ids(span_text(span));
                    tracing::warn!(
                        "🔶 {}: {}; recovered {} treatment ids by scanning",
                        clinic.id,
                        e,
                        ids.len()
                    );
                    diagnostics.push(e.to_string());
                    quality = ParseQuality::IdsOnly;
                    ids.into_iter().map(TreatmentOffering::placeholder).collect()
                }
            },
        };

        let categories = match self.find_array(block, &self.disciplines_key) {
            ArraySpan::Missing => Vec::new(),
            span => match self.decode_span(span, "disciplines") {
                Ok(items) => items.iter().filter_map(category_from_value).collect(),
                Err(e) => {
                    diagnostics.push(e.to_string());
                    quality = degrade(quality);
                    Vec::new()
                }
            },
        };

        let practitioners = match self.find_array(block, &self.staff_key) {
            ArraySpan::Missing => Vec::new(),
            span => match self.decode_span(span, "staff_members") {
                Ok(items) => items
                    .iter()
                    .filter_map(|v| practitioner_from_value(v, clinic, &treatments, &categories))
                    .collect(),
                Err(e) => {
                    diagnostics.push(e.to_string());
                    quality = degrade(quality);
                    Vec::new()
                }
            },
        };

        tracing::debug!(
            "🔍 {}: extracted {} treatments, {} practitioners, {} categories ({:?})",
            clinic.id,
            treatments.len(),
            practitioners.len(),
            categories.len(),
            quality
        );

        ClinicPayload {
            practitioners,
            treatments,
            categories,
            quality,
            diagnostics,
        }
    }

    /// 以起訖標記切出配置區塊；找不到結束標記時延伸到文件結尾
    fn locate_block<'a>(&self, html: &'a str) -> Result<&'a str> {
        let start = html
            .find(&self.settings.start_marker)
            .ok_or_else(|| EngineError::MarkerNotFound {
                marker: self.settings.start_marker.clone(),
            })?;
        let body = &html[start + self.settings.start_marker.len()..];
        let end = body.find(&self.settings.end_marker).unwrap_or(body.len());
        Ok(&body[..end])
    }

    fn find_array<'a>(&self, block: &'a str, key: &Regex) -> ArraySpan<'a> {
        let Some(m) = key.find(block) else {
            return ArraySpan::Missing;
        };
        // pattern 以 '[' 結尾
        let open = m.end() - 1;
        match balanced_end(block, open) {
            Some(close) => ArraySpan::Balanced(&block[open..=close]),
            None => ArraySpan::Unterminated(&block[open..]),
        }
    }

    /// 依序嘗試：原文、移除尾逗號、還原跳脫引號、合併重複引號
    fn decode_span(&self, span: ArraySpan<'_>, label: &str) -> Result<Vec<Value>> {
        let raw = match span {
            ArraySpan::Balanced(text) => text,
            ArraySpan::Unterminated(_) => {
                return Err(EngineError::Parse {
                    message: format!("{} list has no closing bracket", label),
                })
            }
            ArraySpan::Missing => {
                return Err(EngineError::Parse {
                    message: format!("{} list not found", label),
                })
            }
        };

        if let Ok(items) = serde_json::from_str::<Vec<Value>>(raw) {
            return Ok(items);
        }

        let without_commas = self.strip_trailing_commas(raw);
        let candidates = [
            without_commas.clone(),
            self.strip_trailing_commas(&unescape_backslash_quotes(&without_commas)),
            self.strip_trailing_commas(&collapse_doubled_quotes(&without_commas)),
        ];

        let mut last_error = None;
        for candidate in &candidates {
            match serde_json::from_str::<Vec<Value>>(candidate) {
                Ok(items) => {
                    tracing::debug!("🔧 {} list decoded after repair", label);
                    return Ok(items);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(EngineError::Parse {
            message: format!(
                "{} list could not be decoded: {}",
                label,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    fn strip_trailing_commas(&self, raw: &str) -> String {
        self.trailing_comma.replace_all(raw, "$1").into_owned()
    }

    /// 解碼失敗時的後備：收集 `"id": n`，依出現順序去重
    fn scan_ids(&self, text: &str) -> Vec<u64> {
        let mut seen = HashSet::new();
        self.id_field
            .captures_iter(text)
            .filter_map(|caps| caps[1].parse::<u64>().ok())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

impl Default for ConfigBlockExtractor {
    fn default() -> Self {
        Self::new(ExtractorSettings::default())
    }
}

fn list_key_pattern(key: &str) -> Regex {
    // key 可能是裸字、加引號，或在 JS 字串常值中的 `\"key\"`
    Regex::new(&format!(r#"\\?["']?\b{}\b\\?["']?\s*:\s*\["#, regex::escape(key)))
        .expect("valid list key pattern")
}

fn span_text(span: ArraySpan<'_>) -> &str {
    match span {
        ArraySpan::Balanced(text) | ArraySpan::Unterminated(text) => text,
        ArraySpan::Missing => "",
    }
}

fn degrade(quality: ParseQuality) -> ParseQuality {
    match quality {
        ParseQuality::Full => ParseQuality::Partial,
        other => other,
    }
}

/// 從 `open` 位置的 '[' 找到對應的 ']'，略過單、雙引號字串內容
fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape = false;
    for (offset, ch) in text[open..].char_indices() {
        // 跳脫字元在字串外也要略過，`\"` 形式的區塊才不會被誤判為字串開頭
        if escape {
            escape = false;
            continue;
        }
        if ch == '\\' {
            escape = true;
            continue;
        }
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn unescape_backslash_quotes(raw: &str) -> String {
    raw.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn collapse_doubled_quotes(raw: &str) -> String {
    raw.replace("\"\"", "\"")
}

fn value_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

fn value_str(value: Option<&Value>) -> Option<String> {
    value?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn treatment_from_value(value: &Value) -> Option<TreatmentOffering> {
    let id = value_u64(value.get("id"))?;
    let practitioner_ids = value
        .get("staff_member_ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(|v| value_u64(Some(v))).collect::<BTreeSet<_>>());

    Some(TreatmentOffering {
        id,
        name: value_str(value.get("name")).unwrap_or_else(|| format!("Treatment {}", id)),
        duration_seconds: value_u64(value.get("treatment_duration"))
            .or_else(|| value_u64(value.get("duration"))),
        price: value_f64(value.get("price")),
        practitioner_ids,
        category_id: value_u64(value.get("discipline_id"))
            .or_else(|| value_u64(value.get("category_id"))),
        placeholder: false,
    })
}

fn category_from_value(value: &Value) -> Option<Category> {
    let id = value_u64(value.get("id"))?;
    Some(Category {
        id,
        name: value_str(value.get("name")).unwrap_or_else(|| format!("Discipline {}", id)),
    })
}

fn practitioner_from_value(
    value: &Value,
    clinic: &ClinicSource,
    treatments: &[TreatmentOffering],
    categories: &[Category],
) -> Option<Practitioner> {
    let id = value_u64(value.get("id"))?;

    let name = value_str(value.get("full_name")).unwrap_or_else(|| {
        let first = value_str(value.get("first_name")).unwrap_or_default();
        let last = value_str(value.get("last_name")).unwrap_or_default();
        let joined = format!("{} {}", first, last).trim().to_string();
        if joined.is_empty() {
            format!("Practitioner {}", id)
        } else {
            joined
        }
    });

    let credentials = ["professional_designation", "title", "credentials"]
        .iter()
        .find_map(|key| value_str(value.get(*key)));
    let bio = value_str(value.get("bio")).unwrap_or_default();

    let mut specialties: BTreeSet<String> = derive_specialties(
        &format!("{} {}", credentials.as_deref().unwrap_or_default(), bio),
    );
    // 治療師可執行項目所屬的類別也視為專長
    for treatment in treatments {
        let assigned = treatment
            .practitioner_ids
            .as_ref()
            .is_some_and(|ids| ids.contains(&id));
        if !assigned {
            continue;
        }
        if let Some(category) = treatment
            .category_id
            .and_then(|cid| categories.iter().find(|c| c.id == cid))
        {
            specialties.insert(category.name.clone());
        }
    }

    Some(Practitioner {
        id,
        clinic_id: clinic.id.clone(),
        name,
        credentials,
        specialties: specialties.into_iter().collect(),
        booking_link: format!("{}/#/staff_member/{}", clinic.base_url(), id),
    })
}

pub fn derive_specialties(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    let words: HashSet<String> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    SPECIALTY_KEYWORDS
        .iter()
        .filter(|(needle, _, whole_word)| {
            if *whole_word {
                words.contains(*needle)
            } else {
                lower.contains(needle)
            }
        })
        .map(|(_, tag, _)| tag.to_string())
        .collect()
}
