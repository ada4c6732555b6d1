use crate::config::tables::{ClinicDefaults, LookupEntry, TreatmentTables};
use crate::domain::model::ClinicSource;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub extractor: ExtractorSettings,
    #[serde(default)]
    pub generic_treatment: GenericTreatment,
    #[serde(default)]
    pub clinics: Vec<ClinicSource>,
    #[serde(default)]
    pub treatment_defaults: HashMap<String, ClinicDefaults>,
    /// clinic id -> treatment id (字串) -> 顯示名稱/價格
    #[serde(default)]
    pub treatment_lookup: HashMap<String, HashMap<String, LookupEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub page_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub max_treatments_per_practitioner: usize,
    pub max_concurrent_requests: usize,
    pub inter_clinic_delay_ms: u64,
    pub cache_ttl_minutes: u64,
    pub num_days: u32,
    pub location_id: u32,
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_timeout_seconds: 15,
            request_timeout_seconds: 10,
            max_treatments_per_practitioner: 10,
            max_concurrent_requests: 4,
            inter_clinic_delay_ms: 1500,
            cache_ttl_minutes: 30,
            num_days: 7,
            location_id: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn inter_clinic_delay(&self) -> Duration {
        Duration::from_millis(self.inter_clinic_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }
}

/// 內嵌配置區塊的起訖標記
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub start_marker: String,
    pub end_marker: String,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            start_marker: "window.initialState".to_string(),
            end_marker: "</script>".to_string(),
        }
    }
}

/// 目錄與查找表都沒有資料時使用的通用治療項目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericTreatment {
    pub name: String,
    pub duration_minutes: i64,
    pub price: Option<f64>,
}

impl Default for GenericTreatment {
    fn default() -> Self {
        Self {
            name: "Massage Therapy".to_string(),
            duration_minutes: 60,
            price: None,
        }
    }
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EngineError::Io)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EngineError::ConfigValidation {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CLINIC_BASE_URL})，未定義的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    /// 內建資料表加上使用者設定的表（同一診所以使用者設定為準）
    pub fn treatment_tables(&self) -> Result<TreatmentTables> {
        let user = TreatmentTables::from_sections(&self.treatment_defaults, &self.treatment_lookup)?;
        Ok(user.merged_over(TreatmentTables::builtin()?))
    }

    pub fn enabled_clinics(&self) -> impl Iterator<Item = &ClinicSource> {
        self.clinics.iter().filter(|c| c.enabled)
    }

    pub fn clinic(&self, id: &str) -> Option<&ClinicSource> {
        self.clinics.iter().find(|c| c.id == id)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        let engine = &self.engine;
        validation::validate_positive_number(
            "engine.max_treatments_per_practitioner",
            engine.max_treatments_per_practitioner,
            1,
        )?;
        validation::validate_positive_number(
            "engine.max_concurrent_requests",
            engine.max_concurrent_requests,
            1,
        )?;
        validation::validate_range("engine.num_days", engine.num_days, 1, 60)?;
        validation::validate_range("engine.request_timeout_seconds", engine.request_timeout_seconds, 1, 300)?;
        validation::validate_range("engine.page_timeout_seconds", engine.page_timeout_seconds, 1, 300)?;
        validation::validate_non_empty_string("engine.user_agent", &engine.user_agent)?;

        validation::validate_non_empty_string("extractor.start_marker", &self.extractor.start_marker)?;
        validation::validate_non_empty_string("extractor.end_marker", &self.extractor.end_marker)?;

        validation::validate_non_empty_string("generic_treatment.name", &self.generic_treatment.name)?;
        validation::validate_range(
            "generic_treatment.duration_minutes",
            self.generic_treatment.duration_minutes,
            1,
            24 * 60,
        )?;

        for clinic in &self.clinics {
            validation::validate_non_empty_string("clinics.id", &clinic.id)?;
            validation::validate_url(&format!("clinics.{}.url", clinic.id), &clinic.url)?;
        }
        validation::validate_unique("clinics.id", self.clinics.iter().map(|c| c.id.as_str()))?;

        // 查找表的 key 必須是數字
        self.treatment_tables()?;

        Ok(())
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[engine]
max_treatments_per_practitioner = 5
cache_ttl_minutes = 45
num_days = 14

[extractor]
start_marker = "window.bootstrap"

[generic_treatment]
name = "Registered Massage"
duration_minutes = 45
price = 95.0

[[clinics]]
id = "downtown"
name = "Downtown Wellness"
url = "https://downtown.example.com"

[[clinics]]
id = "uptown"
name = "Uptown Physio"
url = "https://uptown.example.com/"
enabled = false

[treatment_defaults.downtown]
ids = [4, 8]

[treatment_lookup.downtown.4]
name = "Deep Tissue 60"
price = 120.0
"#;

        let config = EngineConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.engine.max_treatments_per_practitioner, 5);
        assert_eq!(config.engine.cache_ttl(), Duration::from_secs(45 * 60));
        // 未設定的欄位使用預設值
        assert_eq!(config.engine.location_id, 1);
        assert_eq!(config.extractor.start_marker, "window.bootstrap");
        assert_eq!(config.extractor.end_marker, "</script>");
        assert_eq!(config.generic_treatment.duration_minutes, 45);
        assert_eq!(config.clinics.len(), 2);
        assert_eq!(config.enabled_clinics().count(), 1);
        assert_eq!(config.clinic("uptown").unwrap().base_url(), "https://uptown.example.com");

        let tables = config.treatment_tables().unwrap();
        assert_eq!(tables.default_ids("downtown"), &[4, 8]);
        assert_eq!(tables.lookup("downtown", 4).unwrap().name, "Deep Tissue 60");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine.max_treatments_per_practitioner, 10);
        assert_eq!(config.engine.cache_ttl_minutes, 30);
        assert!(config.clinics.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RMT_AVAIL_TEST_CLINIC_URL", "https://env.example.com");

        let toml_content = r#"
[[clinics]]
id = "env"
name = "Env Clinic"
url = "${RMT_AVAIL_TEST_CLINIC_URL}"
"#;

        let config = EngineConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.clinics[0].url, "https://env.example.com");

        std::env::remove_var("RMT_AVAIL_TEST_CLINIC_URL");
    }

    #[test]
    fn test_config_validation_errors() {
        let bad_url = r#"
[[clinics]]
id = "broken"
name = "Broken"
url = "not-a-url"
"#;
        assert!(EngineConfig::from_toml_str(bad_url).unwrap().validate().is_err());

        let duplicate = r#"
[[clinics]]
id = "same"
name = "A"
url = "https://a.example.com"

[[clinics]]
id = "same"
name = "B"
url = "https://b.example.com"
"#;
        assert!(EngineConfig::from_toml_str(duplicate).unwrap().validate().is_err());

        let zero_cap = "[engine]\nmax_treatments_per_practitioner = 0\n";
        assert!(EngineConfig::from_toml_str(zero_cap).unwrap().validate().is_err());

        let bad_lookup_key = "[treatment_lookup.downtown.massage]\nname = \"x\"\n";
        assert!(EngineConfig::from_toml_str(bad_lookup_key).unwrap().validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[engine]\nnum_days = 3\n")
            .unwrap();

        let config = EngineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.engine.num_days, 3);
    }
}
