pub mod aggregator;
pub mod cache;
pub mod engine;
pub mod extractor;
pub mod normalizer;
pub mod resolver;

pub use aggregator::{AggregationOutcome, AggregationReport, Aggregator, BrowsingSession, RunState};
pub use cache::ClinicCache;
pub use engine::{AvailabilityEngine, ClinicAvailability, ClinicLoadSummary};
pub use extractor::ConfigBlockExtractor;
pub use normalizer::SlotNormalizer;
pub use resolver::TreatmentResolver;
pub use crate::utils::error::Result;
