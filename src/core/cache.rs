use crate::domain::model::ClinicPayload;
use crate::domain::ports::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub clinic_id: String,
    pub payload: Arc<ClinicPayload>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// 每間診所的名冊與目錄快取。
///
/// 整筆 entry 以 `Arc` 替換，讀取端只會看到舊資料或完整的新資料。
/// 過期判斷使用注入的 [`Clock`]，測試可以自行控制時間。
pub struct ClinicCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ClinicCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 未命中或已超過 TTL 時回傳 `None`
    pub fn get(&self, clinic_id: &str) -> Option<Arc<CacheEntry>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entries.get(clinic_id)?;

        let age = entry.age(self.clock.now());
        if age > self.ttl {
            tracing::debug!("🔶 Cache expired for {} (age {:?})", clinic_id, age);
            return None;
        }
        Some(Arc::clone(entry))
    }

    pub fn put(&self, clinic_id: &str, payload: ClinicPayload) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            clinic_id: clinic_id.to_string(),
            payload: Arc::new(payload),
            fetched_at: self.clock.now(),
        });

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(clinic_id.to_string(), Arc::clone(&entry));
        tracing::debug!("💾 Cached payload for {}", clinic_id);
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClinicCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
