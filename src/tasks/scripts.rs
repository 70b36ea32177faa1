use std::process::{Command, Stdio};

use camino::Utf8PathBuf;

use crate::config::Config;
use crate::core::Environment;
use crate::error::{ScriptError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, glob_in};

const OUT_DIR: &str = "js";

/// Bundles the script entry with esbuild.
///
/// `main.js` becomes `js/main.min.js`, minified and transpiled down to the
/// configured target. In watch mode esbuild also writes `main.min.js.map`.
pub struct Scripts {
    entry: Utf8PathBuf,
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
    target: String,
    esbuild: String,
}

impl Scripts {
    pub fn new(config: &Config) -> Self {
        Self {
            entry: config.paths.script.clone(),
            root: config.paths.script_root.clone(),
            dist: config.paths.dist.join(OUT_DIR),
            target: config.tools.script_target.clone(),
            esbuild: config.tools.esbuild.clone(),
        }
    }

    fn outfile(&self) -> Utf8PathBuf {
        let stem = self.entry.file_stem().unwrap_or("main");
        self.dist.join(format!("{stem}.min.js"))
    }

    /// The arguments esbuild is invoked with.
    pub(crate) fn args(&self, env: &Environment) -> Vec<String> {
        let mut args = vec![
            self.entry.to_string(),
            "--bundle".to_string(),
            "--minify".to_string(),
            format!("--target={}", self.target),
            format!("--outfile={}", self.outfile()),
            "--log-level=warning".to_string(),
        ];

        if env.source_maps() {
            args.push("--sourcemap".to_string());
        }

        args
    }
}

impl Task for Scripts {
    fn name(&self) -> &str {
        "scripts"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        if !self.entry.is_file() {
            return Err(ScriptError::Entry(self.entry.clone()).into());
        }

        ctx.set_message(&format!("Bundling {}", self.entry));

        let output = Command::new(&self.esbuild)
            .args(self.args(ctx.env))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ScriptError::Spawn(self.esbuild.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScriptError::Esbuild(stderr.trim().to_string()).into());
        }

        let mut report = Report::new();
        let outfile = self.outfile();

        if ctx.env.source_maps() {
            report.push(format!("{outfile}.map"));
        }
        report.push(outfile);

        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        vec![glob_in(&self.root, "**/*.js")]
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::Tree(OUT_DIR.into())]
    }

    fn reloads(&self) -> bool {
        true
    }
}
