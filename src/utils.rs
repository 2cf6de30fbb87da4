use crate::error::TelemetryError;
use std::path::{Path, PathBuf};

/// Get the user's home directory path
pub fn home_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home;
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    #[cfg(windows)]
    {
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            return PathBuf::from(userprofile);
        }
    }
    PathBuf::from(".")
}

/// Per-user configuration directory shared by all taco tools.
///
/// `TACO_HOME` wins when set and non-empty; otherwise `~/.taco_home`.
pub fn taco_home() -> PathBuf {
    if let Ok(path) = std::env::var("TACO_HOME")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    home_dir().join(".taco_home")
}

/// Write `contents` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<(), TelemetryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(format!(
        "{}.{}.tmp",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    std::fs::write(&tmp_path, contents)?;
    if let Err(err) = replace_file_atomic(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    Ok(())
}

#[cfg(windows)]
fn replace_file_atomic(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::PermissionDenied
            ) && to.exists() =>
        {
            let _ = std::fs::remove_file(to);
            std::fs::rename(from, to).map_err(|rename_err| {
                std::io::Error::new(
                    rename_err.kind(),
                    format!(
                        "failed to replace existing file after initial rename error ({err}): {rename_err}"
                    ),
                )
            })
        }
        Err(err) => Err(err),
    }
}

#[cfg(not(windows))]
fn replace_file_atomic(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to)
}
