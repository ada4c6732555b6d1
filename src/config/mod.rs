#[cfg(feature = "cli")]
pub mod cli;
pub mod tables;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliArgs;
pub use tables::TreatmentTables;
pub use toml_config::{EngineConfig, EngineSettings, ExtractorSettings, GenericTreatment};
