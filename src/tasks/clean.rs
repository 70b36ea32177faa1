use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;
use crate::error::{CleanError, TaskError};
use crate::task::{Report, Task, TaskContext};

/// Empties the output directory.
///
/// Every entry directly under the directory is removed, the directory itself
/// is kept (or created). Running it on an empty or missing directory is fine.
pub struct Clean {
    dist: Utf8PathBuf,
}

impl Clean {
    pub fn new(config: &Config) -> Self {
        Self {
            dist: config.paths.dist.clone(),
        }
    }
}

impl Task for Clean {
    fn name(&self) -> &str {
        "clean"
    }

    fn run(&self, _: &TaskContext<'_>) -> Result<Report, TaskError> {
        clear_dir(&self.dist)?;
        Ok(Report::new())
    }
}

pub(crate) fn clear_dir(dir: &Utf8Path) -> Result<(), CleanError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return fs::create_dir_all(dir).map_err(|e| CleanError::Create(dir.to_owned(), e));
        }
        Err(e) => return Err(CleanError::Remove(dir.to_owned(), e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| CleanError::Remove(dir.to_owned(), e))?;
        let path = entry.path();
        let display = Utf8PathBuf::try_from(path.clone())
            .unwrap_or_else(|_| Utf8PathBuf::from(path.to_string_lossy().into_owned()));

        let result = match entry.file_type() {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) => Err(e),
        };

        result.map_err(|e| CleanError::Remove(display, e))?;
    }

    tracing::debug!(dir = %dir, "cleaned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;

    fn is_empty(dir: &Utf8Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_clean_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let config = Config::default().rooted(root);
        let dist = config.paths.dist.clone();

        fs::create_dir_all(dist.join("css/nested")).unwrap();
        fs::write(dist.join("css/nested/a.css"), "a").unwrap();
        fs::write(dist.join("index.html"), "<p>").unwrap();

        let env = Environment::build();
        let ctx = TaskContext::new(&env);
        let task = Clean::new(&config);

        task.run(&ctx).unwrap();
        assert!(is_empty(&dist));

        task.run(&ctx).unwrap();
        assert!(is_empty(&dist));
    }

    #[test]
    fn test_clean_missing_dir_creates_it() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = Utf8Path::from_path(tmp.path()).unwrap().join("missing");

        clear_dir(&dist).unwrap();
        assert!(dist.is_dir());
        assert!(is_empty(&dist));
    }
}
