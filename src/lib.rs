pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use adapters::{HttpOpeningsFetcher, HttpPageFetcher};
pub use config::EngineConfig;
pub use core::{AvailabilityEngine, ClinicCache};
pub use domain::contract::AvailabilityResponse;
pub use utils::error::{EngineError, Result};

/// 以 HTTP adapter 組裝的引擎
pub type HttpEngine = AvailabilityEngine<HttpPageFetcher, HttpOpeningsFetcher>;

/// 依配置建立使用真實 HTTP 的引擎
pub fn http_engine(config: &EngineConfig) -> Result<HttpEngine> {
    let client = adapters::browser_client(&config.engine)?;
    let pages = HttpPageFetcher::new(client.clone(), config.engine.page_timeout());
    let openings = HttpOpeningsFetcher::new(client, config.engine.request_timeout());
    AvailabilityEngine::from_config(config, pages, openings)
}
