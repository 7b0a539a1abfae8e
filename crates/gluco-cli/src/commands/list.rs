use std::path::Path;

use gluco_core::db::{ReadingFilter, ReadingQuery};
use gluco_core::models::Reading;

use crate::commands::common::{
    format_reading_lines, open_store, reading_to_list_item, ReadingListItem,
};
use crate::error::CliError;

pub async fn list_readings(
    limit: usize,
    unsynced: bool,
    db_path: &Path,
) -> Result<Vec<Reading>, CliError> {
    let store = open_store(db_path).await?;
    let filter = ReadingFilter {
        synced: unsynced.then_some(false),
        ..ReadingFilter::default()
    };
    Ok(store.query(&ReadingQuery::new(filter).limit(limit)).await?)
}

pub async fn run_list(
    limit: usize,
    unsynced: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let readings = list_readings(limit, unsynced, db_path).await?;

    if as_json {
        let json_items = readings
            .iter()
            .map(reading_to_list_item)
            .collect::<Vec<ReadingListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if readings.is_empty() {
        println!("No readings recorded.");
    } else {
        for line in format_reading_lines(&readings) {
            println!("{line}");
        }
    }

    Ok(())
}
