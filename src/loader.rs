use crate::model::performance::{Performance, PerformanceSet};
use crate::model::rendered::Performed;
use crate::model::score::Score;
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote '{}'..!", path.display());
    Ok(())
}

pub fn load_score<P: AsRef<Path>>(path: P) -> Result<Score> {
    let score: Score = read_json(path)?;
    info!(
        "Loaded score '{}' with {} parts and {} notes..!",
        score.title.as_deref().unwrap_or("<untitled>"),
        score.parts.len(),
        score.note_count()
    );
    Ok(score)
}

/// Picks a performance from JSON holding either one performance or a `performances` list.
/// Without a name the first performance of a list is used.
pub fn performance_from_str(text: &str, name: Option<&str>) -> Result<Performance> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    if value.get("performances").is_some() {
        let set: PerformanceSet = serde_json::from_value(value)?;
        let performance = match name {
            Some(name) => set
                .get(name)
                .ok_or_else(|| anyhow!("No performance named '{}'..!", name))?,
            None => set
                .performances
                .first()
                .ok_or_else(|| anyhow!("The performance set is empty..!"))?,
        };
        return Ok(performance.clone());
    }

    let performance: Performance = serde_json::from_value(value)?;
    if let Some(name) = name
        && performance.name != name
    {
        bail!(
            "Performance is named '{}', not '{}'..!",
            performance.name,
            name
        );
    }
    Ok(performance)
}

pub fn load_performance<P: AsRef<Path>>(path: P, name: Option<&str>) -> Result<Performance> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let performance = performance_from_str(&text, name)
        .with_context(|| format!("Failed to load a performance from {}", path.display()))?;
    info!(
        "Loaded performance '{}' with {} parts..!",
        performance.name,
        performance.parts.len()
    );
    Ok(performance)
}

pub fn save_score<P: AsRef<Path>>(score: &Score, path: P) -> Result<()> {
    write_json(score, path)
}

pub fn save_performance<P: AsRef<Path>>(performance: &Performance, path: P) -> Result<()> {
    write_json(performance, path)
}

pub fn load_performed<P: AsRef<Path>>(path: P) -> Result<Performed> {
    read_json(path)
}

pub fn save_performed<P: AsRef<Path>>(performed: &Performed, path: P) -> Result<()> {
    write_json(performed, path)
}
