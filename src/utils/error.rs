use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("HTTP request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request timed out: {url}")]
    Timeout { url: String },

    #[error("Configuration block marker not found: {marker}")]
    MarkerNotFound { marker: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("No availability data for practitioner {practitioner_id}")]
    NoData { practitioner_id: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },
}

/// 錯誤分類，對應引擎的三種失敗情境加上配置/系統錯誤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Fetch,
    Parse,
    NoData,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EngineError {
    /// 將上游 reqwest 錯誤轉換為帶 URL 的錯誤
    pub fn from_request(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            EngineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            EngineError::Fetch(err)
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Fetch(_) | EngineError::HttpStatus { .. } | EngineError::Timeout { .. } => {
                ErrorCategory::Fetch
            }
            EngineError::MarkerNotFound { .. } | EngineError::Parse { .. } => ErrorCategory::Parse,
            EngineError::NoData { .. } => ErrorCategory::NoData,
            EngineError::ConfigValidation { .. }
            | EngineError::InvalidConfigValue { .. }
            | EngineError::MissingConfig { .. } => ErrorCategory::Configuration,
            EngineError::Io(_) | EngineError::Serialization(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::NoData => ErrorSeverity::Low,
            ErrorCategory::Fetch | ErrorCategory::Parse => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 上游暫時性錯誤由呼叫端決定是否重試，引擎內部不重試
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Timeout { .. } | EngineError::Fetch(_) => true,
            EngineError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EngineError::Fetch(_) => "Check network connectivity and that the clinic site is reachable",
            EngineError::HttpStatus { .. } => "Verify the clinic base URL; the booking site may be down or rate limiting",
            EngineError::Timeout { .. } => "Retry later or raise the request timeout in [engine]",
            EngineError::MarkerNotFound { .. } => "The booking page layout may have changed; review [extractor] markers",
            EngineError::Parse { .. } => "The embedded configuration is malformed; the clinic falls back to default treatments",
            EngineError::NoData { .. } => "No openings in the requested window; try a later start date or more days",
            EngineError::Io(_) => "Check that the file exists and is readable",
            EngineError::Serialization(_) => "Inspect the upstream response body for unexpected structure",
            EngineError::ConfigValidation { .. }
            | EngineError::InvalidConfigValue { .. }
            | EngineError::MissingConfig { .. } => "Fix the configuration file and run again",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Fetch => format!("Could not reach the booking site: {}", self),
            ErrorCategory::Parse => format!("Booking page could not be read fully: {}", self),
            ErrorCategory::NoData => "No availability found".to_string(),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
