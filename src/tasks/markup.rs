use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::{MarkupError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, glob_in, write_output};

/// `@@include('path')` or `@@include("path", { "key": "value" })`.
static RE_INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)@@include\(\s*['"](?P<path>[^'"]+)['"]\s*(?:,\s*(?P<params>\{.*?\}))?\s*\)"#)
        .expect("valid include regex")
});

/// `@@name` or `@@nested.name`.
static RE_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@(?P<name>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
        .expect("valid variable regex")
});

/// Flattens `@@include` directives of the root markup document.
///
/// Include paths are resolved relative to the file containing the directive.
/// Parameters passed as a JSON object are available inside the included file
/// (and everything it includes) as `@@name`. The output is written only when
/// the whole document could be assembled.
pub struct Markup {
    entry: Utf8PathBuf,
    dist: Utf8PathBuf,
}

impl Markup {
    pub fn new(config: &Config) -> Self {
        Self {
            entry: config.paths.markup.clone(),
            dist: config.paths.dist.clone(),
        }
    }

    fn file_name(&self) -> &str {
        self.entry.file_name().unwrap_or("index.html")
    }
}

impl Task for Markup {
    fn name(&self) -> &str {
        "html"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let text = fs::read_to_string(&self.entry)
            .map_err(|e| MarkupError::Entry(self.entry.clone(), e))?;

        let mut stack = vec![self.entry.clone()];
        let mut html = assemble(&text, &self.entry, &Map::new(), &mut stack)?;

        if let Some(script) = ctx.env.get_refresh_script() {
            inject_script(&mut html, &script);
        }

        let out = self.dist.join(self.file_name());
        write_output(&out, html)?;

        let mut report = Report::new();
        report.push(out);
        Ok(report)
    }

    /// Every markup file next to or below the entry, so editing a partial
    /// rebuilds the document.
    fn watched(&self) -> Vec<String> {
        let dir = self.entry.parent().unwrap_or(Utf8Path::new("."));
        vec![glob_in(dir, "**/*.html")]
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::File(self.file_name().into())]
    }

    fn reloads(&self) -> bool {
        true
    }
}

/// Resolves the directives in `text`, which was read from `path`.
///
/// `stack` holds the chain of files currently being assembled and is used to
/// detect include cycles.
fn assemble(
    text: &str,
    path: &Utf8Path,
    scope: &Map<String, Value>,
    stack: &mut Vec<Utf8PathBuf>,
) -> Result<String, MarkupError> {
    let text = substitute(text, scope);
    let base = path.parent().unwrap_or(Utf8Path::new(""));

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in RE_INCLUDE.captures_iter(&text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        let include = normalize(&base.join(&caps["path"]));

        let mut inner_scope = scope.clone();
        if let Some(params) = caps.name("params") {
            let params: Map<String, Value> = serde_json::from_str(params.as_str())
                .map_err(|e| MarkupError::Params(path.to_owned(), e))?;
            inner_scope.extend(params);
        }

        if stack.contains(&include) {
            let chain = stack
                .iter()
                .chain(std::iter::once(&include))
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(MarkupError::Cycle(chain));
        }

        let inner = fs::read_to_string(&include).map_err(|source| MarkupError::Missing {
            include: include.clone(),
            from: path.to_owned(),
            source,
        })?;

        stack.push(include.clone());
        let inner = assemble(&inner, &include, &inner_scope, stack)?;
        stack.pop();

        out.push_str(&inner);
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Replaces `@@name` with values from `scope`; unknown names stay untouched.
fn substitute(text: &str, scope: &Map<String, Value>) -> String {
    if scope.is_empty() {
        return text.to_string();
    }

    RE_VARIABLE
        .replace_all(text, |caps: &Captures| {
            let name = &caps["name"];
            if name == "include" {
                return caps[0].to_string();
            }

            let mut parts = name.split('.');
            let first = parts.next().and_then(|key| scope.get(key));
            let value = parts.fold(first, |value, key| value.and_then(|v| v.get(key)));

            match value {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Lexically removes `.` and `..` so the same file is always spelled the same.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    use camino::Utf8Component;

    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

fn inject_script(html: &mut String, script: &str) {
    let tag = format!("<script>{script}</script>\n");

    match html.rfind("</body>") {
        Some(index) => html.insert_str(index, &tag),
        None => html.push_str(&tag),
    }
}
