use super::Document;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Backing file for a collection: `<dir>/<name>.json`.
pub fn collection_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

/// Load a collection file. Missing or unreadable files yield an empty
/// collection; malformed elements are skipped with a warning.
pub fn load_collection(path: &Path) -> Vec<Document> {
    if !path.exists() {
        log::info!("Collection file {} not found, starting empty", path.display());
        return Vec::new();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    // Fast path for a well-formed file
    match serde_json::from_str::<Vec<Document>>(&content) {
        Ok(docs) => return docs,
        Err(e) => {
            log::warn!("Failed to parse {} directly: {}, attempting partial recovery", path.display(), e);
        }
    }

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => {
            let total = items.len();
            let docs: Vec<Document> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(doc) => Some(doc),
                    _ => None,
                })
                .collect();
            log::warn!(
                "Recovered {} of {} records from {}",
                docs.len(),
                total,
                path.display()
            );
            docs
        }
        Ok(_) => {
            log::error!("{} does not contain a JSON array, starting empty. The file has been preserved.", path.display());
            Vec::new()
        }
        Err(e) => {
            log::error!("{} is not valid JSON ({}), starting empty. The file has been preserved.", path.display(), e);
            Vec::new()
        }
    }
}

/// Serialize a collection for its backing file.
pub fn render_collection(docs: &[Document]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(docs)
}

/// Replace the file at `path` with `content` (temp file + rename).
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
