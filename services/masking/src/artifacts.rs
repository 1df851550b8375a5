use crate::error::{PipelineError, Result};
use crate::object_store::ObjectStore;
use std::path::{Path, PathBuf};
use tracing::info;

/// Copy every object under `prefix` into `destination`, flattened to its basename.
///
/// Returns the written paths. An empty `bucket` means no external artifacts
/// are configured and nothing is copied.
pub async fn sync_model_artifacts(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    destination: &Path,
) -> Result<Vec<PathBuf>> {
    if bucket.is_empty() {
        info!("No external model artifacts configured");
        return Ok(Vec::new());
    }

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| io_error(destination, e))?;

    let mut written = Vec::new();
    for key in store.list(bucket, prefix).await? {
        let Some(name) = basename(&key) else {
            // "directory" placeholder objects
            continue;
        };

        let target = destination.join(name);
        info!("Downloading model artifact {} to {}", key, target.display());

        let bytes = store.get(bucket, &key).await?;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(&target, e))?;
        written.push(target);
    }

    Ok(written)
}

fn basename(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.display().to_string(),
        source: e,
    }
}
