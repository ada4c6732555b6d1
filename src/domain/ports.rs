use crate::domain::model::{ClinicSource, OpeningsResponse};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// 取得診所公開預約頁面的原始 HTML
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, clinic: &ClinicSource) -> Result<String>;
}

/// 單一 (治療師, 治療項目) 的可用性查詢參數
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningsQuery {
    pub base_url: String,
    pub location_id: u32,
    pub practitioner_id: u64,
    pub treatment_id: u64,
    pub start_date: NaiveDate,
    pub num_days: u32,
    pub session_token: String,
}

#[async_trait]
pub trait OpeningsSource: Send + Sync {
    async fn fetch_openings(&self, query: &OpeningsQuery) -> Result<OpeningsResponse>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
