//! Save and restore whole containers, cached payloads included.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Write `value` to `path` as JSON.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    info!("saved {path:?}");
    Ok(())
}

/// Read a value written by [`save`].
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    let value = serde_json::from_reader(reader)?;
    info!("loaded {path:?}");
    Ok(value)
}
