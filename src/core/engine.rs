use crate::config::{EngineConfig, EngineSettings};
use crate::core::aggregator::{AggregationOutcome, Aggregator, BrowsingSession};
use crate::core::cache::ClinicCache;
use crate::core::extractor::ConfigBlockExtractor;
use crate::core::resolver::TreatmentResolver;
use crate::domain::model::{ClinicPayload, ClinicSource, DateWindow, ParseQuality};
use crate::domain::ports::{OpeningsSource, PageSource};
use crate::utils::error::{EngineError, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一間診所在一個時間窗內的所有治療師結果
#[derive(Debug, Clone)]
pub struct ClinicAvailability {
    pub clinic_id: String,
    pub quality: ParseQuality,
    pub practitioners: Vec<AggregationOutcome>,
}

/// 批次載入時每間診所的摘要
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicLoadSummary {
    pub clinic_id: String,
    pub practitioners: usize,
    pub treatments: usize,
    pub quality: ParseQuality,
    pub from_cache: bool,
}

/// 串起頁面抓取、區塊擷取、快取與各治療師的聚合
pub struct AvailabilityEngine<P: PageSource, O: OpeningsSource> {
    pages: P,
    extractor: ConfigBlockExtractor,
    aggregator: Aggregator<O>,
    cache: ClinicCache,
    max_concurrent: usize,
    num_days: u32,
    inter_clinic_delay: Duration,
}

impl<P: PageSource, O: OpeningsSource> AvailabilityEngine<P, O> {
    pub fn from_config(config: &EngineConfig, pages: P, openings: O) -> Result<Self> {
        let settings: &EngineSettings = &config.engine;
        let aggregator = Aggregator::new(openings, config.treatment_tables()?, config.generic_treatment.clone())
            .with_resolver(TreatmentResolver::new(settings.max_treatments_per_practitioner))
            .with_max_concurrent(settings.max_concurrent_requests)
            .with_location_id(settings.location_id);

        Ok(Self {
            pages,
            extractor: ConfigBlockExtractor::new(config.extractor.clone()),
            aggregator,
            cache: ClinicCache::new(settings.cache_ttl()),
            max_concurrent: settings.max_concurrent_requests.max(1),
            num_days: settings.num_days,
            inter_clinic_delay: settings.inter_clinic_delay(),
        })
    }

    /// 替換快取（測試時注入可控時鐘）
    pub fn with_cache(mut self, cache: ClinicCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ClinicCache {
        &self.cache
    }

    pub fn window_from(&self, start: NaiveDate) -> DateWindow {
        DateWindow::new(start, self.num_days)
    }

    /// 取得診所名冊與目錄，優先使用快取。
    /// 頁面抓取失敗時回傳空名冊且不寫入快取。
    pub async fn clinic_payload(&self, clinic: &ClinicSource) -> Arc<ClinicPayload> {
        self.load_payload(clinic).await.0
    }

    async fn load_payload(&self, clinic: &ClinicSource) -> (Arc<ClinicPayload>, bool) {
        if let Some(entry) = self.cache.get(&clinic.id) {
            tracing::debug!("💾 Using cached payload for {}", clinic.id);
            return (Arc::clone(&entry.payload), true);
        }

        tracing::info!("📡 Fetching booking page for {}", clinic.id);
        let html = match self.pages.fetch_page(clinic).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!("❌ {}: page fetch failed: {}", clinic.id, e.user_friendly_message());
                let mut payload = ClinicPayload::empty(ParseQuality::NotFound);
                payload.diagnostics.push(e.to_string());
                return (Arc::new(payload), false);
            }
        };

        let payload = self.extractor.extract(&html, clinic);
        if payload.quality.is_degraded() {
            tracing::warn!(
                "🔶 {}: {:?} parse, {} practitioners / {} treatments: {}",
                clinic.id,
                payload.quality,
                payload.practitioners.len(),
                payload.treatments.len(),
                payload.diagnostics.join("; ")
            );
        }
        // 沒有可用名冊或目錄的結果不進快取，下次查詢重新抓取
        if payload.quality == ParseQuality::NotFound
            || (payload.practitioners.is_empty() && payload.treatments.is_empty())
        {
            return (Arc::new(payload), false);
        }

        let entry = self.cache.put(&clinic.id, payload);
        (Arc::clone(&entry.payload), false)
    }

    pub async fn practitioner_availability(
        &self,
        clinic: &ClinicSource,
        practitioner_id: u64,
        window: DateWindow,
    ) -> Result<AggregationOutcome> {
        let payload = self.clinic_payload(clinic).await;
        let practitioner = payload
            .practitioner(practitioner_id)
            .ok_or(EngineError::NoData { practitioner_id })?;

        let session = BrowsingSession::new();
        Ok(self
            .aggregator
            .aggregate(clinic, &payload, practitioner, window, &session)
            .await)
    }

    /// 同一間診所的治療師平行聚合，共用一個 session token
    pub async fn clinic_availability(&self, clinic: &ClinicSource, window: DateWindow) -> ClinicAvailability {
        let started = Instant::now();
        let payload = self.clinic_payload(clinic).await;
        let session = BrowsingSession::new();

        tracing::info!(
            "🔄 {}: aggregating {} practitioners from {} for {} days",
            clinic.id,
            payload.practitioners.len(),
            window.start,
            window.num_days
        );

        let practitioners: Vec<AggregationOutcome> = stream::iter(payload.practitioners.iter())
            .map(|practitioner| {
                self.aggregator
                    .aggregate(clinic, &payload, practitioner, window, &session)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        tracing::info!(
            "✅ {}: {} practitioners done in {:?}",
            clinic.id,
            practitioners.len(),
            started.elapsed()
        );

        ClinicAvailability {
            clinic_id: clinic.id.clone(),
            quality: payload.quality,
            practitioners,
        }
    }

    /// 依序載入所有啟用中的診所，之間保留固定間隔
    pub async fn load_all_clinics<'a, I>(&self, clinics: I) -> Vec<ClinicLoadSummary>
    where
        I: IntoIterator<Item = &'a ClinicSource>,
    {
        let mut summaries = Vec::new();

        for clinic in clinics {
            if !clinic.enabled {
                tracing::info!("⏭️ Skipping disabled clinic: {}", clinic.id);
                continue;
            }
            if !summaries.is_empty() && !self.inter_clinic_delay.is_zero() {
                tokio::time::sleep(self.inter_clinic_delay).await;
            }

            let (payload, from_cache) = self.load_payload(clinic).await;
            summaries.push(ClinicLoadSummary {
                clinic_id: clinic.id.clone(),
                practitioners: payload.practitioners.len(),
                treatments: payload.treatments.len(),
                quality: payload.quality,
                from_cache,
            });
        }

        tracing::info!("📊 Loaded {} clinics", summaries.len());
        summaries
    }
}
