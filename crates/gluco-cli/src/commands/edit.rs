use std::path::Path;

use gluco_core::models::ReadingPatch;

use crate::commands::common::{open_store, parse_reading_id};
use crate::error::CliError;

pub async fn run_edit(id: &str, patch: ReadingPatch, db_path: &Path) -> Result<(), CliError> {
    if patch.is_empty() {
        return Err(CliError::EmptyEdit);
    }
    let reading_id = parse_reading_id(id)?;
    let store = open_store(db_path).await?;

    let reading = store
        .edit_reading(&reading_id, &patch)
        .await
        .map_err(|error| match error {
            gluco_core::Error::NotFound(_) => CliError::ReadingNotFound(reading_id.to_string()),
            other => other.into(),
        })?;
    println!("{}", reading.id);
    Ok(())
}
