use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use rmt_avail::domain::model::{ClinicSource, DateWindow};
use rmt_avail::utils::error::ErrorSeverity;
use rmt_avail::utils::{logger, validation, validation::Validate};
use rmt_avail::{http_engine, AvailabilityResponse, CliArgs, EngineConfig, EngineError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting rmt-avail CLI");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let start = match &args.date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("--date must be YYYY-MM-DD, got '{}'", raw))?,
        None => chrono::Local::now().date_naive(),
    };
    let days = args.days.unwrap_or(config.engine.num_days);
    if let Err(e) = validation::validate_range("--days", days, 1, 60) {
        exit_with(&e);
    }
    let window = DateWindow::new(start, days);

    let clinics: Vec<ClinicSource> = match &args.clinic {
        Some(id) => match config.clinic(id) {
            Some(clinic) => vec![clinic.clone()],
            None => exit_with(&EngineError::MissingConfig {
                field: format!("clinics.{}", id),
            }),
        },
        None => config.enabled_clinics().cloned().collect(),
    };
    if clinics.is_empty() {
        exit_with(&EngineError::MissingConfig {
            field: "clinics".to_string(),
        });
    }

    let engine = match http_engine(&config) {
        Ok(engine) => engine,
        Err(e) => exit_with(&e),
    };

    // 先依序載入名冊（含診所間隔），後續查詢直接命中快取
    let summaries = engine.load_all_clinics(&clinics).await;
    for summary in &summaries {
        tracing::info!(
            "📋 {}: {} practitioners, {} treatments ({:?})",
            summary.clinic_id,
            summary.practitioners,
            summary.treatments,
            summary.quality
        );
    }

    let mut responses: Vec<AvailabilityResponse> = Vec::new();
    for clinic in &clinics {
        let result = engine.clinic_availability(clinic, window).await;
        for outcome in &result.practitioners {
            let confidence = outcome.availability.confidence();
            tracing::info!(
                "📊 {} ({}): {}",
                outcome.availability.practitioner.name,
                clinic.id,
                confidence.describe()
            );
            if let Some(e) = outcome.no_data() {
                tracing::debug!("💡 {}", e.recovery_suggestion());
            }
            responses.push(AvailabilityResponse::from(&outcome.availability));
        }
    }

    println!("{}", serde_json::to_string_pretty(&responses)?);
    tracing::info!("✅ Wrote availability for {} practitioners", responses.len());

    Ok(())
}

fn load_config(path: &str) -> rmt_avail::Result<EngineConfig> {
    let config = EngineConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// 記錄錯誤並依嚴重程度結束程式
fn exit_with(e: &EngineError) -> ! {
    tracing::error!(
        "❌ rmt-avail failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2, // 可重試
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
