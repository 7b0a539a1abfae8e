use std::path::Path;

use gluco_core::config::ClientConfig;
use gluco_core::models::{GlucoseUnit, NewReading, ReadingCategory, ReadingSource};

use crate::commands::common::{build_engine, open_store, parse_time};
use crate::error::CliError;

/// Options of `gluco add` beyond the value itself
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub unit: Option<GlucoseUnit>,
    pub category: ReadingCategory,
    pub note: Option<String>,
    pub at: Option<String>,
    pub device: bool,
    pub no_push: bool,
}

pub async fn run_add(
    value: f64,
    options: AddOptions,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let settings = store.load_settings().await?;

    let mut input = NewReading::new(
        value,
        options
            .unit
            .or(config.preferred_unit)
            .unwrap_or(settings.preferred_unit),
    )
    .with_category(options.category);
    if let Some(note) = options.note {
        input = input.with_note(note);
    }
    if let Some(raw) = options.at.as_deref() {
        input = input.at(parse_time(raw)?);
    }
    if options.device {
        input = input.with_source(ReadingSource::Device);
    }

    let engine = if options.no_push {
        None
    } else {
        build_engine(&store, config).await?
    };

    let Some(engine) = engine else {
        let reading = store.create_reading(input).await?;
        println!("{}", reading.id);
        return Ok(());
    };

    let created = engine.create_and_push(input).await?;
    println!("{}", created.reading.id);
    match created.push {
        None => eprintln!("Offline; reading queued for sync"),
        Some(summary) if summary.failed > 0 => eprintln!(
            "Push failed; reading queued for retry: {}",
            summary.last_error.as_deref().unwrap_or("unknown error")
        ),
        Some(_) => {}
    }
    Ok(())
}
