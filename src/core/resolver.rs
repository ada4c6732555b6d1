use crate::config::TreatmentTables;
use crate::domain::model::{ClinicPayload, Practitioner};
use std::collections::HashSet;

pub const DEFAULT_MAX_TREATMENTS: usize = 10;

/// 治療 id 清單的來源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Catalog,
    ClinicDefaults,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreatmentSelection {
    pub ids: Vec<u64>,
    pub source: SelectionSource,
}

/// 決定每位治療師要查詢哪些治療項目，數量有上限以限制對上游的請求
#[derive(Debug, Clone)]
pub struct TreatmentResolver {
    max_treatments: usize,
}

impl TreatmentResolver {
    pub fn new(max_treatments: usize) -> Self {
        Self {
            max_treatments: max_treatments.max(1),
        }
    }

    pub fn resolve(
        &self,
        practitioner: &Practitioner,
        payload: &ClinicPayload,
        tables: &TreatmentTables,
    ) -> TreatmentSelection {
        let from_catalog = self.capped(
            payload
                .treatments
                .iter()
                .filter(|t| t.is_eligible(practitioner.id))
                .map(|t| t.id),
        );
        if !from_catalog.is_empty() {
            return TreatmentSelection {
                ids: from_catalog,
                source: SelectionSource::Catalog,
            };
        }

        let defaults = self.capped(tables.default_ids(&practitioner.clinic_id).iter().copied());
        if !defaults.is_empty() {
            tracing::debug!(
                "📋 {}: no catalog treatments for practitioner {}, using {} clinic defaults",
                practitioner.clinic_id,
                practitioner.id,
                defaults.len()
            );
            return TreatmentSelection {
                ids: defaults,
                source: SelectionSource::ClinicDefaults,
            };
        }

        TreatmentSelection {
            ids: Vec::new(),
            source: SelectionSource::Empty,
        }
    }

    /// 保留首次出現的順序並去重
    fn capped(&self, ids: impl Iterator<Item = u64>) -> Vec<u64> {
        let mut seen = HashSet::new();
        ids.filter(|id| seen.insert(*id))
            .take(self.max_treatments)
            .collect()
    }
}

impl Default for TreatmentResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TREATMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ParseQuality, TreatmentOffering};

    fn practitioner(id: u64) -> Practitioner {
        Practitioner {
            id,
            clinic_id: "yorkville".to_string(),
            name: format!("P{}", id),
            credentials: None,
            specialties: vec![],
            booking_link: String::new(),
        }
    }

    fn offering(id: u64, staff: Option<&[u64]>) -> TreatmentOffering {
        TreatmentOffering {
            id,
            name: format!("T{}", id),
            duration_seconds: Some(3600),
            price: None,
            practitioner_ids: staff.map(|s| s.iter().copied().collect()),
            category_id: None,
            placeholder: false,
        }
    }

    fn payload(treatments: Vec<TreatmentOffering>) -> ClinicPayload {
        let mut payload = ClinicPayload::empty(ParseQuality::Full);
        payload.treatments = treatments;
        payload
    }

    #[test]
    fn test_catalog_match_preserves_order() {
        let payload = payload(vec![
            offering(5, Some(&[1, 2])),
            offering(3, Some(&[2])),
            offering(8, Some(&[1])),
        ]);
        let selection =
            TreatmentResolver::default().resolve(&practitioner(1), &payload, &TreatmentTables::default());

        assert_eq!(selection.source, SelectionSource::Catalog);
        assert_eq!(selection.ids, vec![5, 8]);
    }

    #[test]
    fn test_catalog_match_is_capped() {
        let treatments = (1..=15).map(|id| offering(id, Some(&[1]))).collect();
        let selection = TreatmentResolver::default().resolve(
            &practitioner(1),
            &payload(treatments),
            &TreatmentTables::default(),
        );
        assert_eq!(selection.ids.len(), DEFAULT_MAX_TREATMENTS);
        assert_eq!(selection.ids[0], 1);

        let small = TreatmentResolver::new(2).resolve(
            &practitioner(1),
            &payload((1..=5).map(|id| offering(id, Some(&[1]))).collect()),
            &TreatmentTables::default(),
        );
        assert_eq!(small.ids, vec![1, 2]);
    }

    #[test]
    fn test_unknown_eligibility_counts_as_match() {
        let payload = payload(vec![TreatmentOffering::placeholder(21), offering(22, Some(&[9]))]);
        let selection =
            TreatmentResolver::default().resolve(&practitioner(1), &payload, &TreatmentTables::default());
        assert_eq!(selection.ids, vec![21]);
    }

    #[test]
    fn test_falls_back_to_clinic_defaults() {
        let tables = TreatmentTables::default()
            .with_defaults("yorkville", vec![1, 9, 1])
            .with_defaults("elsewhere", vec![77]);
        let selection = TreatmentResolver::default().resolve(
            &practitioner(1),
            &payload(vec![offering(4, Some(&[2]))]),
            &tables,
        );
        assert_eq!(selection.source, SelectionSource::ClinicDefaults);
        assert_eq!(selection.ids, vec![1, 9]);
    }

    #[test]
    fn test_empty_when_nothing_known() {
        let selection = TreatmentResolver::default().resolve(
            &practitioner(1),
            &payload(vec![]),
            &TreatmentTables::default(),
        );
        assert_eq!(selection.source, SelectionSource::Empty);
        assert!(selection.ids.is_empty());
    }
}
