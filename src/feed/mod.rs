pub mod merge;
pub mod provider;

pub use merge::{merge_fragments, normalize_text, MergeStats};
pub use provider::{load_judgments, FragmentSource, JsonFileSource};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::MatchFragment;

/// Poll every source concurrently and concatenate what they return.
///
/// A source that errors or exceeds `timeout` contributes nothing; the pass
/// carries on with whatever the other sources delivered.
pub async fn collect_fragments(
    sources: &[Arc<dyn FragmentSource>],
    timeout: Duration,
) -> Vec<MatchFragment> {
    let fetches: Vec<_> = sources
        .iter()
        .map(|s| {
            let s = Arc::clone(s);
            async move {
                let out = match tokio::time::timeout(timeout, s.fetch_fragments()).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
                };
                (s.name().to_string(), out)
            }
        })
        .collect();

    let mut fragments = Vec::new();
    for (name, result) in futures_util::future::join_all(fetches).await {
        match result {
            Ok(batch) => {
                info!("Source '{}' delivered {} fragment(s)", name, batch.len());
                fragments.extend(batch);
            }
            Err(e) => warn!("Source '{}' failed: {:#}", name, e),
        }
    }
    fragments
}
