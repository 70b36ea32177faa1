use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;
use crate::error::TaskError;
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, glob_in};

/// Copies the resources directory verbatim into the output root.
pub struct Resources {
    source: Utf8PathBuf,
    dist: Utf8PathBuf,
}

impl Resources {
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.paths.resources.clone(),
            dist: config.paths.dist.clone(),
        }
    }
}

impl Task for Resources {
    fn name(&self) -> &str {
        "resources"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let mut report = Report::new();

        if !self.source.is_dir() {
            tracing::info!(dir = %self.source, "no resources directory, nothing to copy");
            return Ok(report);
        }

        ctx.set_message("Copying resources...");
        copy_rec(&self.source, &self.dist, &mut report)?;

        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        vec![glob_in(&self.source, "**/*")]
    }

    /// Each top-level entry of the resources directory, as it exists when the
    /// pipeline is assembled.
    fn claims(&self) -> Vec<Claim> {
        let Ok(entries) = fs::read_dir(&self.source) else {
            return vec![];
        };

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = Utf8PathBuf::from(entry.file_name().to_str()?);
                let is_dir = entry.file_type().ok()?.is_dir();
                Some(if is_dir {
                    Claim::Tree(name)
                } else {
                    Claim::File(name)
                })
            })
            .collect()
    }
}

fn copy_rec(src: &Utf8Path, dst: &Utf8Path, report: &mut Report) -> Result<(), TaskError> {
    fs::create_dir_all(dst)?;

    for entry in src.read_dir_utf8()? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_rec(entry.path(), &target, report)?;
        } else {
            fs::copy(entry.path(), &target)?;
            report.push(target);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;

    #[test]
    fn test_copies_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let config = Config::default().rooted(root);
        let source = config.paths.resources.clone();
        let dist = config.paths.dist.clone();

        fs::create_dir_all(source.join("docs/deep")).unwrap();
        fs::write(source.join("robots.txt"), "User-agent: *").unwrap();
        fs::write(source.join("docs/deep/a.pdf"), [1, 2, 3]).unwrap();

        let env = Environment::build();
        let task = Resources::new(&config);
        let report = task.run(&TaskContext::new(&env)).unwrap();

        assert_eq!(report.outputs.len(), 2);
        assert_eq!(
            fs::read_to_string(dist.join("robots.txt")).unwrap(),
            "User-agent: *"
        );
        assert_eq!(fs::read(dist.join("docs/deep/a.pdf")).unwrap(), vec![1, 2, 3]);

        let mut claims = task.claims();
        claims.sort_by_key(|claim| claim.to_string());
        assert_eq!(
            claims,
            vec![Claim::Tree("docs".into()), Claim::File("robots.txt".into())]
        );
    }

    #[test]
    fn test_missing_directory_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();

        let env = Environment::build();
        let mut config = Config::default().rooted(root);
        config.paths.resources = root.join("nope");
        let task = Resources::new(&config);

        assert!(task.run(&TaskContext::new(&env)).unwrap().is_empty());
        assert!(task.claims().is_empty());
    }
}
