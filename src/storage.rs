//! JSON state files.
//!
//! Both the port assignment table and the service registry live in a single
//! JSON file each. Loading never fails: a missing file is first-run state and
//! a corrupt one is logged and treated as empty. Saving goes through a
//! temporary file and a rename so readers never observe a half-written file.

use crate::error::{DynaportError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Reads a JSON document, falling back to `T::default()` when the file is
/// missing or cannot be parsed.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "State file not found, starting empty");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read state file, starting empty");
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
            T::default()
        }
    }
}

/// Writes `value` as pretty-printed JSON using write-then-rename.
pub fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| DynaportError::persistence(parent, e))?;
        }
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file =
        fs::File::create(&temp_path).map_err(|e| DynaportError::persistence(&temp_path, e))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| DynaportError::persistence(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| DynaportError::persistence(path, e))?;
    Ok(())
}
