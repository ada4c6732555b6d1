use crate::config::{GenericTreatment, TreatmentTables};
use crate::core::normalizer::SlotNormalizer;
use crate::core::resolver::{SelectionSource, TreatmentResolver};
use crate::domain::model::{
    ClinicPayload, ClinicSource, DateWindow, FirstAvailableHint, PractitionerAvailability,
    Practitioner, RawOpening,
};
use crate::domain::ports::{OpeningsQuery, OpeningsSource};
use crate::utils::error::{EngineError, Result};
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

const DEFAULT_MAX_CONCURRENT: usize = 4;

/// 模擬單一瀏覽分頁的關聯 token，同一次診所查詢共用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsingSession {
    token: String,
}

impl BrowsingSession {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Default for BrowsingSession {
    fn default() -> Self {
        Self::new()
    }
}

/// 單一治療師聚合流程的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    /// `index` 從 1 開始
    Fetching { index: usize, total: usize },
    Merging,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreatmentFetchOutcome {
    Openings(usize),
    NoOpenings,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreatmentReport {
    pub treatment_id: u64,
    pub outcome: TreatmentFetchOutcome,
}

/// 聚合執行報告，供診斷使用
#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub practitioner_id: u64,
    pub selection_source: SelectionSource,
    pub treatments: Vec<TreatmentReport>,
    pub history: Vec<RunState>,
    pub duration: Duration,
}

impl AggregationReport {
    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Pending)
    }

    pub fn failed_count(&self) -> usize {
        self.treatments
            .iter()
            .filter(|t| matches!(t.outcome, TreatmentFetchOutcome::Failed(_)))
            .count()
    }

    pub fn openings_count(&self) -> usize {
        self.treatments
            .iter()
            .map(|t| match t.outcome {
                TreatmentFetchOutcome::Openings(n) => n,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub availability: PractitionerAvailability,
    pub report: AggregationReport,
}

impl AggregationOutcome {
    /// 沒有真實時段也沒有備援提示時，回傳 NoData 供呼叫端描述
    pub fn no_data(&self) -> Option<EngineError> {
        if self.availability.days.is_empty() {
            Some(EngineError::NoData {
                practitioner_id: self.availability.practitioner.id,
            })
        } else {
            None
        }
    }
}

/// 針對一位治療師：決定治療項目、平行查詢上游、合併成每日時段
pub struct Aggregator<S: OpeningsSource> {
    source: S,
    resolver: TreatmentResolver,
    tables: TreatmentTables,
    generic: GenericTreatment,
    /// 上游查詢的全域許可數，跨治療師共用
    permits: Semaphore,
    location_id: u32,
}

impl<S: OpeningsSource> Aggregator<S> {
    pub fn new(source: S, tables: TreatmentTables, generic: GenericTreatment) -> Self {
        Self {
            source,
            resolver: TreatmentResolver::default(),
            tables,
            generic,
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT),
            location_id: 1,
        }
    }

    pub fn with_resolver(mut self, resolver: TreatmentResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Semaphore::new(max_concurrent.max(1));
        self
    }

    pub fn with_location_id(mut self, location_id: u32) -> Self {
        self.location_id = location_id;
        self
    }

    pub async fn aggregate(
        &self,
        clinic: &ClinicSource,
        payload: &ClinicPayload,
        practitioner: &Practitioner,
        window: DateWindow,
        session: &BrowsingSession,
    ) -> AggregationOutcome {
        let started = Instant::now();
        let mut history = vec![RunState::Pending];

        let selection = self.resolver.resolve(practitioner, payload, &self.tables);
        let total = selection.ids.len();
        tracing::debug!(
            "📡 {} / {}: querying {} treatments ({:?}, tab {})",
            clinic.id,
            practitioner.id,
            total,
            selection.source,
            session.token()
        );

        let results: Vec<(u64, Result<_>)> = stream::iter(selection.ids.iter().copied().enumerate())
            .map(|(i, treatment_id)| {
                history.push(RunState::Fetching { index: i + 1, total });
                let query = OpeningsQuery {
                    base_url: clinic.base_url().to_string(),
                    location_id: self.location_id,
                    practitioner_id: practitioner.id,
                    treatment_id,
                    start_date: window.start,
                    num_days: window.num_days,
                    session_token: session.token().to_string(),
                };
                async move {
                    // 許可只在上游查詢期間持有
                    let _permit = self.permits.acquire().await.ok();
                    (treatment_id, self.source.fetch_openings(&query).await)
                }
            })
            .buffered(total.max(1))
            .collect()
            .await;

        history.push(RunState::Merging);

        let mut openings: Vec<RawOpening> = Vec::new();
        let mut hints: Vec<FirstAvailableHint> = Vec::new();
        let mut upstream_name: Option<String> = None;
        let mut treatments = Vec::with_capacity(results.len());

        for (treatment_id, result) in results {
            let outcome = match result {
                Ok(response) => {
                    if let Some(hint) = response.first_available {
                        hints.push(hint);
                    }
                    if upstream_name.is_none() {
                        upstream_name = response.practitioner_name;
                    }
                    if response.openings.is_empty() {
                        TreatmentFetchOutcome::NoOpenings
                    } else {
                        let count = response.openings.len();
                        openings.extend(response.openings);
                        TreatmentFetchOutcome::Openings(count)
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "❌ {} / {}: treatment {} failed: {}",
                        clinic.id,
                        practitioner.id,
                        treatment_id,
                        e
                    );
                    TreatmentFetchOutcome::Failed(e.to_string())
                }
            };
            treatments.push(TreatmentReport {
                treatment_id,
                outcome,
            });
        }

        // 取最早的提示，同一天時以有時間者為準
        let first_available = hints
            .into_iter()
            .min_by_key(|h| (h.date, h.time.is_none(), h.time));

        let normalizer = SlotNormalizer::new(&clinic.id, payload, &self.tables, &self.generic);
        let days = normalizer.normalize(&openings, Some(window), first_available);

        let mut practitioner = practitioner.clone();
        if practitioner.name.trim().is_empty() {
            if let Some(name) = upstream_name {
                practitioner.name = name;
            }
        }

        let availability = PractitionerAvailability::new(practitioner, &clinic.name, days);
        history.push(RunState::Done);

        let report = AggregationReport {
            practitioner_id: availability.practitioner.id,
            selection_source: selection.source,
            treatments,
            history,
            duration: started.elapsed(),
        };

        tracing::info!(
            "✅ {} / {}: {} openings ({} slots) from {} treatments ({} failed), data source {:?}",
            clinic.id,
            availability.practitioner.id,
            report.openings_count(),
            availability.genuine_slots().count(),
            report.treatments.len(),
            report.failed_count(),
            availability.data_source
        );

        AggregationOutcome {
            availability,
            report,
        }
    }
}
