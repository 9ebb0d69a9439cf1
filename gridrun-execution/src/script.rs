//! Script identifier resolution

use std::path::{Component, Path, PathBuf};

use crate::error::ExecutionError;

/// Resolve a script identifier to a file inside `scripts_dir`
///
/// Identifiers are relative paths made only of plain components; anything
/// that could escape the scripts directory is rejected.
pub fn resolve_script(scripts_dir: &Path, script: &str) -> Result<PathBuf, ExecutionError> {
    let invalid = |reason: &str| ExecutionError::InvalidScript {
        script: script.to_string(),
        reason: reason.to_string(),
    };

    if script.trim().is_empty() {
        return Err(invalid("script identifier is empty"));
    }
    if script.contains('\0') {
        return Err(invalid("script identifier contains a NUL byte"));
    }

    let relative = Path::new(script);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(invalid("parent directory references are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"))
            }
            Component::CurDir => return Err(invalid("'.' components are not allowed")),
        }
    }

    let path = scripts_dir.join(relative);
    if !path.is_file() {
        return Err(invalid(&format!(
            "no such script in {}",
            scripts_dir.display()
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scripts() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("forecast")).unwrap();
        std::fs::write(dir.path().join("forecast/load.py"), "print('{}')").unwrap();
        std::fs::write(dir.path().join("summary.py"), "print('{}')").unwrap();
        dir
    }

    #[test]
    fn test_resolves_nested_script() {
        let dir = scripts();
        let path = resolve_script(dir.path(), "forecast/load.py").unwrap();
        assert_eq!(path, dir.path().join("forecast/load.py"));
        assert!(resolve_script(dir.path(), "summary.py").is_ok());
    }

    #[test]
    fn test_rejects_escapes() {
        let dir = scripts();
        for script in ["../summary.py", "forecast/../../etc/passwd", "/etc/passwd", "./summary.py", "", "  "] {
            let err = resolve_script(dir.path(), script).unwrap_err();
            assert_eq!(err.kind(), "invalid_script", "accepted {:?}", script);
        }
    }

    #[test]
    fn test_rejects_missing_and_directories() {
        let dir = scripts();
        assert!(resolve_script(dir.path(), "missing.py").is_err());
        assert!(resolve_script(dir.path(), "forecast").is_err());
    }
}
