use std::path::Path;

use crate::commands::common::{open_store, parse_reading_id};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let reading_id = parse_reading_id(id)?;
    let store = open_store(db_path).await?;

    store
        .remove_reading(&reading_id)
        .await
        .map_err(|error| match error {
            gluco_core::Error::NotFound(_) => CliError::ReadingNotFound(reading_id.to_string()),
            other => other.into(),
        })?;
    println!("{reading_id}");
    Ok(())
}
