use crate::config::EngineSettings;
use crate::domain::model::{
    parse_upstream_timestamp, ClinicSource, FirstAvailableHint, OpeningStatus, OpeningsResponse,
    RawOpening,
};
use crate::domain::ports::{OpeningsQuery, OpeningsSource, PageSource};
use crate::utils::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const OPENINGS_PATH: &str = "/api/v2/openings";

/// 建立帶瀏覽器標頭的 HTTP client，頁面與 API 共用
pub fn browser_client(settings: &EngineSettings) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    let client = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}

/// 抓取診所公開預約頁面
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl PageSource for HttpPageFetcher {
    async fn fetch_page(&self, clinic: &ClinicSource) -> Result<String> {
        let url = format!("{}/", clinic.base_url());
        tracing::debug!("📡 GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(header::UPGRADE_INSECURE_REQUESTS, "1")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngineError::from_request(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| EngineError::from_request(&url, e))?;
        tracing::debug!("📥 {}: {} bytes", clinic.id, html.len());
        Ok(html)
    }
}

/// 呼叫上游 openings API
#[derive(Clone)]
pub struct HttpOpeningsFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpOpeningsFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl OpeningsSource for HttpOpeningsFetcher {
    async fn fetch_openings(&self, query: &OpeningsQuery) -> Result<OpeningsResponse> {
        let url = openings_url(query)?;
        tracing::debug!(
            "📡 openings staff={} treatment={} date={}",
            query.practitioner_id,
            query.treatment_id,
            query.start_date
        );

        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header("X-Requested-With", "XMLHttpRequest")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngineError::from_request(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::from_request(url.as_str(), e))?;
        let value: Value = serde_json::from_str(&body)?;
        parse_openings_body(&value)
    }
}

pub fn openings_url(query: &OpeningsQuery) -> Result<Url> {
    let base = query.base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{}{}", base, OPENINGS_PATH)).map_err(|e| {
        EngineError::InvalidConfigValue {
            field: "clinic.url".to_string(),
            value: query.base_url.clone(),
            reason: e.to_string(),
        }
    })?;

    url.query_pairs_mut()
        .append_pair("location_id", &query.location_id.to_string())
        .append_pair("staff_member_id", &query.practitioner_id.to_string())
        .append_pair("treatment_id", &query.treatment_id.to_string())
        .append_pair("date", &query.start_date.format("%Y-%m-%d").to_string())
        .append_pair("num_days", &query.num_days.to_string())
        .append_pair("browser_tab_id", &query.session_token);

    Ok(url)
}

/// 解析 openings 回應：JSON 陣列，第一個元素是治療師摘要。
/// 格式錯誤的單筆 opening 會被略過。
pub fn parse_openings_body(body: &Value) -> Result<OpeningsResponse> {
    let entries = body.as_array().ok_or_else(|| EngineError::Parse {
        message: "openings response is not a JSON array".to_string(),
    })?;

    let summary = match entries.first() {
        Some(summary) => summary,
        None => return Ok(OpeningsResponse::default()),
    };

    let practitioner_name = summary
        .get("full_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let first_available = summary
        .get("first_date")
        .and_then(Value::as_str)
        .and_then(FirstAvailableHint::parse);

    let mut openings = Vec::new();
    let mut skipped = 0usize;
    if let Some(items) = summary.get("openings").and_then(Value::as_array) {
        for item in items {
            match raw_opening(item) {
                Some(opening) => openings.push(opening),
                None => skipped += 1,
            }
        }
    }
    if skipped > 0 {
        tracing::warn!("🔶 Skipped {} malformed openings", skipped);
    }

    Ok(OpeningsResponse {
        practitioner_name,
        first_available,
        openings,
    })
}

fn raw_opening(item: &Value) -> Option<RawOpening> {
    let start_at = parse_upstream_timestamp(item.get("start_at")?.as_str()?)?;
    let end_at = parse_upstream_timestamp(item.get("end_at")?.as_str()?)?;
    let status = item
        .get("status")
        .and_then(Value::as_str)
        .map(OpeningStatus::parse)
        .unwrap_or_else(|| OpeningStatus::Other(String::new()));

    Some(RawOpening {
        start_at,
        end_at,
        status,
        treatment_id: item.get("treatment_id").and_then(number_or_string),
        declared_duration_minutes: item
            .get("duration")
            .and_then(number_or_string)
            .and_then(|d| i64::try_from(d).ok()),
    })
}

fn number_or_string(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
