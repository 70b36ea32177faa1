use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};

use crate::config::Config;
use crate::error::{SpriteError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, expand_globs, glob_in, write_output};

const OUT_FILE: &str = "img/svg/sprite.svg";

/// Shows only the icon addressed by the URL fragment.
const STACK_STYLE: &str = ":root>svg{display:none}:root>svg:target{display:inline}";

/// The root element: its attributes and its children.
static RE_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<svg\b(?P<attrs>[^>]*?)(?:/>|>(?P<body>.*)</svg\s*>)").expect("valid svg regex")
});

static RE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<name>[A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("valid attribute regex")
});

static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));

/// An `id` attribute inside an icon.
static RE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre>\sid\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#).expect("valid id regex")
});

/// A local reference: `url(#x)`, `href="#x"` or `xlink:href="#x"`.
static RE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre>url\(\s*['"]?#|href\s*=\s*["']#)(?P<id>[^"')\s]+)"#)
        .expect("valid reference regex")
});

/// Root attributes which belong to the standalone file, not to the icon.
const DROPPED: &[&str] = &["id", "xmlns", "version", "x", "y"];

/// Merges the icon directory into a single stack-mode SVG sprite.
///
/// Each icon becomes a nested `<svg id="<stem>">` which can be referenced as
/// `sprite.svg#<stem>`, either from an `<img>` or from `<use>`.
pub struct Sprites {
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
}

impl Sprites {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.paths.icons.clone(),
            dist: config.paths.dist.clone(),
        }
    }
}

impl Task for Sprites {
    fn name(&self) -> &str {
        "sprites"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let sources = expand_globs(&[glob_in(&self.root, "*.svg")])?;
        let mut report = Report::new();

        if sources.is_empty() {
            tracing::info!("no icons in {}", self.root);
            return Ok(report);
        }

        ctx.set_message(&format!("Merging {} icons", sources.len()));

        let mut icons = Vec::with_capacity(sources.len());
        for path in &sources {
            let text = fs::read_to_string(path)?;
            icons.push(Icon::parse(path, &text)?);
        }

        let sprite = build_sprite(&icons)?;
        let out = self.dist.join(OUT_FILE);
        write_output(&out, sprite)?;

        report.push(out);
        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        vec![glob_in(&self.root, "*.svg")]
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::File(OUT_FILE.into())]
    }
}

#[derive(Debug)]
struct Icon {
    path: Utf8PathBuf,
    id: String,
    attrs: Vec<(String, String)>,
    namespaces: Vec<(String, String)>,
    body: String,
}

impl Icon {
    fn parse(path: &Utf8Path, text: &str) -> Result<Self, SpriteError> {
        let text = RE_COMMENT.replace_all(text, "");
        let caps = RE_ROOT
            .captures(&text)
            .ok_or_else(|| SpriteError::NotSvg(path.to_owned()))?;

        let mut attrs: Vec<(String, String)> = Vec::new();
        let mut namespaces = Vec::new();

        for attr in RE_ATTR.captures_iter(&caps["attrs"]) {
            let name = attr["name"].to_string();
            let value = attr
                .name("dq")
                .or_else(|| attr.name("sq"))
                .map_or("", |m| m.as_str())
                .replace('"', "&quot;");

            if name.starts_with("xmlns:") {
                namespaces.push((name, value));
            } else if !DROPPED.contains(&name.as_str()) {
                attrs.push((name, value));
            }
        }

        if !attrs.iter().any(|(name, _)| name == "viewBox") {
            let size = |key: &str| {
                attrs
                    .iter()
                    .find(|(name, _)| name == key)
                    .and_then(|(_, v)| v.trim_end_matches("px").parse::<f64>().ok())
            };

            if let (Some(w), Some(h)) = (size("width"), size("height")) {
                attrs.insert(0, ("viewBox".to_string(), format!("0 0 {w} {h}")));
            }
        }

        let id = sanitize_id(path.file_stem().unwrap_or_default());
        let body = caps.name("body").map_or("", |m| m.as_str()).trim();
        let body = scope_ids(&id, body);

        Ok(Self {
            path: path.to_owned(),
            id,
            attrs,
            namespaces,
            body,
        })
    }
}

/// Turns a file stem into a valid fragment identifier, replacing only the
/// characters which can't appear in one.
fn sanitize_id(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Prefixes every id defined inside an icon with the icon's own id, along
/// with the local references pointing at them. Other references are kept.
fn scope_ids(icon: &str, body: &str) -> String {
    let defined: HashSet<String> = RE_ID
        .captures_iter(body)
        .filter_map(|caps| caps.name("dq").or_else(|| caps.name("sq")))
        .map(|m| m.as_str().to_string())
        .collect();

    if defined.is_empty() {
        return body.to_string();
    }

    let body = RE_ID.replace_all(body, |caps: &Captures| {
        let value = caps.name("dq").or_else(|| caps.name("sq")).map_or("", |m| m.as_str());
        format!("{}\"{icon}_{value}\"", &caps["pre"])
    });

    RE_REF
        .replace_all(&body, |caps: &Captures| {
            let id = &caps["id"];
            if defined.contains(id) {
                format!("{}{icon}_{id}", &caps["pre"])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn build_sprite(icons: &[Icon]) -> Result<String, SpriteError> {
    let mut by_id: BTreeMap<&str, &Icon> = BTreeMap::new();
    for icon in icons {
        if let Some(prev) = by_id.insert(&icon.id, icon) {
            return Err(SpriteError::DuplicateId(
                prev.path.clone(),
                icon.path.clone(),
                icon.id.clone(),
            ));
        }
    }

    let mut namespaces: BTreeMap<&str, &str> = BTreeMap::new();
    namespaces.insert("xmlns", "http://www.w3.org/2000/svg");
    for icon in icons {
        for (name, value) in &icon.namespaces {
            namespaces.entry(name).or_insert(value);
        }
    }

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<svg");
    for (name, value) in namespaces {
        out.push_str(&format!(" {name}=\"{value}\""));
    }
    out.push_str(">\n");
    out.push_str(&format!("<style>{STACK_STYLE}</style>\n"));

    for (id, icon) in by_id {
        out.push_str(&format!("<svg id=\"{id}\""));
        for (name, value) in &icon.attrs {
            out.push_str(&format!(" {name}=\"{value}\""));
        }
        out.push('>');
        out.push_str(&icon.body);
        out.push_str("</svg>\n");
    }

    out.push_str("</svg>\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;

    fn project() -> (tempfile::TempDir, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::default().rooted(&root);
        fs::create_dir_all(&config.paths.icons).unwrap();
        (tmp, config)
    }

    fn icon(config: &Config, name: &str, text: &str) {
        fs::write(config.paths.icons.join(name), text).unwrap();
    }

    #[test]
    fn test_n_icons_n_ids() {
        let (_tmp, config) = project();

        icon(
            &config,
            "home.svg",
            r#"<?xml version="1.0"?><!-- exported --><svg xmlns="http://www.w3.org/2000/svg" version="1.1" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2"><path d="M0 0h24v24H0z"/></svg>"#,
        );
        icon(
            &config,
            "arrow left.svg",
            r##"<svg xmlns:xlink="http://www.w3.org/1999/xlink" width="16px" height="8"><use xlink:href="#a"/></svg>"##,
        );
        icon(&config, "3d.svg", "<svg viewBox='0 0 1 1'/>");

        let env = Environment::build();
        let report = Sprites::new(&config).run(&TaskContext::new(&env)).unwrap();

        let out = config.paths.dist.join("img/svg/sprite.svg");
        assert_eq!(report.outputs, vec![out.clone()]);

        let sprite = fs::read_to_string(out).unwrap();
        assert_eq!(sprite.matches("<svg id=").count(), 3);
        assert!(sprite.contains(
            r#"<svg id="home" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2"><path d="M0 0h24v24H0z"/></svg>"#
        ));
        assert!(sprite.contains(
            r##"<svg id="arrow-left" viewBox="0 0 16 8" width="16px" height="8"><use xlink:href="#a"/></svg>"##
        ));
        assert!(sprite.contains(r#"<svg id="3d" viewBox="0 0 1 1"></svg>"#));
        assert!(sprite.contains(r#"xmlns:xlink="http://www.w3.org/1999/xlink""#));
        assert!(sprite.contains(":root>svg:target{display:inline}"));
        assert!(!sprite.contains("exported"));
        assert!(!sprite.contains("version=\"1.1\""));
    }

    #[test]
    fn test_inner_ids_scoped_per_icon() {
        let (_tmp, config) = project();

        let exported = r##"<svg viewBox="0 0 16 16"><g clip-path="url(#clip0)"><path d="M0 0h8v8H0z"/></g><defs><clipPath id="clip0"><rect width="16" height="16"/></clipPath></defs><use href="#clip0"/><use xlink:href="#outside"/></svg>"##;
        icon(&config, "a.svg", exported);
        icon(&config, "b.svg", exported);

        let env = Environment::build();
        Sprites::new(&config).run(&TaskContext::new(&env)).unwrap();

        let sprite = fs::read_to_string(config.paths.dist.join("img/svg/sprite.svg")).unwrap();
        assert!(!sprite.contains(r#"id="clip0""#));
        assert_eq!(sprite.matches(r#"id="a_clip0""#).count(), 1);
        assert_eq!(sprite.matches(r#"id="b_clip0""#).count(), 1);
        assert!(sprite.contains("url(#a_clip0)"));
        assert!(sprite.contains("url(#b_clip0)"));
        assert!(sprite.contains(r##"<use href="#b_clip0"/>"##));
        assert_eq!(sprite.matches(r##"xlink:href="#outside""##).count(), 2);
    }

    #[test]
    fn test_sanitize_id_keeps_valid_names() {
        assert_eq!(sanitize_id("3d"), "3d");
        assert_eq!(sanitize_id("arrow left"), "arrow-left");
        assert_eq!(sanitize_id("icon.small_v2"), "icon.small_v2");
        assert_eq!(sanitize_id("a#b\"c"), "a-b-c");
    }

    #[test]
    fn test_not_svg() {
        let (_tmp, config) = project();
        icon(&config, "bad.svg", "<html></html>");

        let env = Environment::build();
        let err = Sprites::new(&config)
            .run(&TaskContext::new(&env))
            .unwrap_err();

        assert!(matches!(err, TaskError::Sprite(SpriteError::NotSvg(_))));
    }

    #[test]
    fn test_duplicate_ids() {
        let (_tmp, config) = project();
        icon(&config, "a b.svg", "<svg/>");
        icon(&config, "a-b.svg", "<svg/>");

        let env = Environment::build();
        let err = Sprites::new(&config)
            .run(&TaskContext::new(&env))
            .unwrap_err();

        assert!(matches!(err, TaskError::Sprite(SpriteError::DuplicateId(..))));
    }

    #[test]
    fn test_no_icons_no_sprite() {
        let (_tmp, config) = project();

        let env = Environment::build();
        let report = Sprites::new(&config).run(&TaskContext::new(&env)).unwrap();

        assert!(report.is_empty());
        assert!(!config.paths.dist.join("img/svg/sprite.svg").exists());
    }
}
