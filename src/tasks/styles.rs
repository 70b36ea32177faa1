use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::Config;
use crate::error::{StyleError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, expand_globs, glob_in, write_output};

const OUT_DIR: &str = "css";

/// Compiles SCSS to prefixed, minified CSS.
///
/// Every `*.scss` file below the style root is an entry, except partials whose
/// name starts with `_`. `main.scss` becomes `css/main.min.css`, nested
/// entries keep their relative directory. In watch mode a source map is
/// written next to each stylesheet.
pub struct Styles {
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
    browsers: String,
}

impl Styles {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.paths.styles.clone(),
            dist: config.paths.dist.join(OUT_DIR),
            browsers: config.tools.browsers.clone(),
        }
    }

    fn compile(
        &self,
        path: &Utf8Path,
        targets: Targets,
        source_map: bool,
    ) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let opts = grass::Options::default().style(grass::OutputStyle::Expanded);
        let css = grass::from_path(path, &opts).map_err(StyleError::Sass)?;

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let stem = path.file_stem().unwrap_or("style");
        let file_name = format!("{stem}.min.css");
        let out = self.dist.join(relative).with_file_name(&file_name);

        let (mut code, map) = minify(&css, relative.as_str(), targets, source_map)?;

        let mut written = Vec::with_capacity(2);

        if let Some(map) = map {
            let map_path = out.with_file_name(format!("{file_name}.map"));
            code.push_str(&format!("\n/*# sourceMappingURL={file_name}.map */"));
            write_output(&map_path, map)?;
            written.push(map_path);
        }

        write_output(&out, code)?;
        written.push(out);

        Ok(written)
    }
}

impl Task for Styles {
    fn name(&self) -> &str {
        "styles"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let targets = targets(&self.browsers)?;
        let source_map = ctx.env.source_maps();

        let entries: Vec<_> = expand_globs(&[glob_in(&self.root, "**/*.scss")])?
            .into_iter()
            .filter(|path| !path.file_name().is_some_and(|name| name.starts_with('_')))
            .collect();

        ctx.set_message(&format!("Compiling {} stylesheets", entries.len()));

        let results: Vec<_> = entries
            .par_iter()
            .map(|path| self.compile(path, targets, source_map))
            .collect();

        let mut report = Report::new();
        for result in results {
            for path in result? {
                report.push(path);
            }
        }

        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        vec![glob_in(&self.root, "**/*.scss")]
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::Tree(OUT_DIR.into())]
    }

    fn reloads(&self) -> bool {
        true
    }
}

fn targets(query: &str) -> Result<Targets, StyleError> {
    let browsers = Browsers::from_browserslist([query])
        .map_err(|e| StyleError::Browsers(query.to_string(), e.to_string()))?;

    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

/// Prefixes and minifies compiled CSS, optionally producing a source map.
fn minify(
    css: &str,
    filename: &str,
    targets: Targets,
    source_map: bool,
) -> Result<(String, Option<String>), StyleError> {
    let css_error = |e: String| StyleError::Css(filename.into(), e);

    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| css_error(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| css_error(e.to_string()))?;

    let mut map = if source_map {
        let mut map = SourceMap::new("/");
        map.add_source(filename);
        map.set_source_content(0, css)
            .map_err(|e| StyleError::SourceMap(format!("{e:?}")))?;
        Some(map)
    } else {
        None
    };

    let result = sheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: map.as_mut(),
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| css_error(e.to_string()))?;

    let map = match map {
        Some(mut map) => Some(
            map.to_json(None)
                .map_err(|e| StyleError::SourceMap(format!("{e:?}")))?,
        ),
        None => None,
    };

    Ok((result.code, map))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::Environment;

    fn project() -> (tempfile::TempDir, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::default().rooted(&root);

        let styles = &config.paths.styles;
        fs::create_dir_all(styles.join("components")).unwrap();
        fs::write(styles.join("_vars.scss"), "$accent: #ff0000;").unwrap();
        fs::write(
            styles.join("a.scss"),
            "@import 'vars';\n@import 'b';\n.a { color: $accent; user-select: none; }\n",
        )
        .unwrap();
        fs::write(styles.join("b.scss"), ".b { margin: 0 0 0 0; }\n").unwrap();
        fs::write(styles.join("components/card.scss"), ".card { .title { padding: 1px; } }")
            .unwrap();

        (tmp, config)
    }

    #[test]
    fn test_production_build_has_no_maps() {
        let (_tmp, config) = project();
        let css = config.paths.dist.join("css");

        let env = Environment::build();
        let report = Styles::new(&config).run(&TaskContext::new(&env)).unwrap();

        assert_eq!(report.outputs.len(), 3);
        assert!(!css.join("_vars.min.css").exists());
        assert!(!css.join("a.min.css.map").exists());

        let a = fs::read_to_string(css.join("a.min.css")).unwrap();
        assert!(a.contains(".b{margin:0}"));
        assert!(a.contains("-webkit-user-select:none"));
        assert!(!a.contains('\n'));
        assert!(!a.contains("sourceMappingURL"));

        let card = fs::read_to_string(css.join("components/card.min.css")).unwrap();
        assert!(card.contains(".card .title{padding:1px}"));
    }

    #[test]
    fn test_watch_build_writes_maps() {
        let (_tmp, config) = project();
        let css = config.paths.dist.join("css");

        let env = Environment::watch(None);
        let report = Styles::new(&config).run(&TaskContext::new(&env)).unwrap();

        assert_eq!(report.outputs.len(), 6);

        let a = fs::read_to_string(css.join("a.min.css")).unwrap();
        assert!(a.ends_with("/*# sourceMappingURL=a.min.css.map */"));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(css.join("a.min.css.map")).unwrap())
                .unwrap();
        assert_eq!(map["version"], 3);
        assert!(map["mappings"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[test]
    fn test_syntax_error_is_recoverable() {
        let (_tmp, config) = project();
        fs::write(config.paths.styles.join("broken.scss"), ".x { color: ; ").unwrap();

        let env = Environment::build();
        let err = Styles::new(&config)
            .run(&TaskContext::new(&env))
            .unwrap_err();

        assert!(err.is_recoverable(), "{err}");
    }

    #[test]
    fn test_invalid_browserslist() {
        assert!(matches!(
            targets("definitely not a query"),
            Err(StyleError::Browsers(..))
        ));
    }
}
