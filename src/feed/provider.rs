use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{MatchFragment, ProbabilityJudgment};

/// Trait that every match/odds source must implement.
#[async_trait]
pub trait FragmentSource: Send + Sync {
    /// Return every fragment the source currently holds.
    async fn fetch_fragments(&self) -> Result<Vec<MatchFragment>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Reads a JSON array of fragments written by an external scraper.
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        JsonFileSource { path, name }
    }
}

#[async_trait]
impl FragmentSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_fragments(&self) -> Result<Vec<MatchFragment>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let raw: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", self.path.display()))?;
        Ok(parse_fragments(&raw, self.name()))
    }
}

/// Parse each array element on its own; a malformed element is skipped.
fn parse_fragments(raw: &Value, source_name: &str) -> Vec<MatchFragment> {
    let items = match raw.as_array() {
        Some(a) => a,
        None => {
            warn!("{}: expected a JSON array of fragments", source_name);
            return vec![];
        }
    };

    let fragments: Vec<MatchFragment> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            match serde_json::from_value::<MatchFragment>(item.clone()) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("{}: skipping fragment #{}: {}", source_name, i, e);
                    None
                }
            }
        })
        .collect();
    debug!(
        "{}: parsed {}/{} fragments",
        source_name,
        fragments.len(),
        items.len()
    );
    fragments
}

/// Parse external judgments keyed by selection key. Entries without a usable
/// probability/confidence are skipped and counted.
pub fn parse_judgments(raw: &Value) -> (HashMap<String, ProbabilityJudgment>, usize) {
    let Some(entries) = raw.as_object() else {
        warn!("Judgments: expected a JSON object keyed by selection");
        return (HashMap::new(), 0);
    };
    let mut judgments = HashMap::new();
    let mut malformed = 0usize;
    for (key, value) in entries {
        match ProbabilityJudgment::from_value(value) {
            Some(j) => {
                judgments.insert(key.trim().to_string(), j);
            }
            None => {
                warn!("Judgments: ignoring malformed entry for {}", key);
                malformed += 1;
            }
        }
    }
    (judgments, malformed)
}

/// Read and parse a judgments file.
pub async fn load_judgments(path: &Path) -> Result<(HashMap<String, ProbabilityJudgment>, usize)> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(parse_judgments(&raw))
}
