use crate::{OrchestratorError, Result};
use harvest_core::EntityKey;
use persistence_layer::read_column;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Entity keys from the `column` of every `*.csv` under `input`.
///
/// `input` may be a single CSV file or a directory. Values are trimmed, empty
/// ones dropped, and the result is deduplicated and sorted. Files without
/// the column are reported and ignored.
pub fn discover_entities(input: &Path, column: &str) -> Result<Vec<EntityKey>> {
    let files = csv_files(input)?;
    let mut keys = BTreeSet::new();

    for file in &files {
        match read_column(file, column) {
            Ok(Some(values)) => {
                let before = keys.len();
                keys.extend(
                    values
                        .iter()
                        .map(|v| v.trim())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string),
                );
                debug!("📄 {}: {} new keys", file.display(), keys.len() - before);
            }
            Ok(None) => warn!("⚠️ {} has no '{}' column", file.display(), column),
            Err(e) => warn!("⚠️ Could not read {}: {}", file.display(), e),
        }
    }

    info!(
        "🔍 Discovered {} unique keys in {} files under {}",
        keys.len(),
        files.len(),
        input.display()
    );
    Ok(keys.into_iter().map(EntityKey::new).collect())
}

fn csv_files(input: &Path) -> Result<Vec<PathBuf>> {
    let io_error = |source| OrchestratorError::Input {
        path: input.display().to_string(),
        source,
    };

    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(input).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
