//! Project configuration.
//!
//! Every setting has a default matching the conventional source layout, so a
//! project without a `kumitate.toml` builds out of the box. A config file only
//! needs to list the keys it overrides:
//!
//! ```toml
//! [paths]
//! dist = "public"
//!
//! [tools]
//! browsers = "defaults"
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE: &str = "kumitate.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub tools: Tools,
    pub server: Server,
}

/// Source and output locations, relative to the project root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Output directory, wiped at the start of every pipeline run.
    pub dist: Utf8PathBuf,
    /// Root of the SCSS tree.
    pub styles: Utf8PathBuf,
    /// The root markup document containing `@@include` directives.
    pub markup: Utf8PathBuf,
    /// The script entry point.
    pub script: Utf8PathBuf,
    /// Directory watched for script changes.
    pub script_root: Utf8PathBuf,
    /// Raster images.
    pub images: Utf8PathBuf,
    /// Vector icons merged into the sprite.
    pub icons: Utf8PathBuf,
    /// TrueType fonts.
    pub fonts: Utf8PathBuf,
    /// Copied verbatim into the output root.
    pub resources: Utf8PathBuf,
    /// Scratch space for cached artifacts.
    pub cache: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            dist: "app".into(),
            styles: "src/scss".into(),
            markup: "src/index.html".into(),
            script: "src/js/main.js".into(),
            script_root: "src/js".into(),
            images: "src/img".into(),
            icons: "src/img/svg".into(),
            fonts: "src/fonts".into(),
            resources: "resources".into(),
            cache: ".cache".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    /// Browserslist query used for vendor prefixing.
    pub browsers: String,
    /// Esbuild `--target` value.
    pub script_target: String,
    /// Esbuild binary.
    pub esbuild: String,
    /// JPEG re-encoding quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            browsers: "last 10 versions".into(),
            script_target: "es2015".into(),
            esbuild: "esbuild".into(),
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    pub http_port: u16,
    /// Preferred live-reload port; an ephemeral one is used when taken.
    pub reload_port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            http_port: 8080,
            reload_port: 1337,
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from [`CONFIG_FILE`] when no path is
    /// given. A missing default file is not an error.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Utf8PathBuf::from(CONFIG_FILE), false),
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Read(path, e)),
        };

        Self::parse(&text).map_err(|e| ConfigError::Parse(path, e))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Resolves every relative path against `root`.
    pub fn rooted(mut self, root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        let paths = &mut self.paths;

        for path in [
            &mut paths.dist,
            &mut paths.styles,
            &mut paths.markup,
            &mut paths.script,
            &mut paths.script_root,
            &mut paths.images,
            &mut paths.icons,
            &mut paths.fonts,
            &mut paths.resources,
            &mut paths.cache,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }

        self
    }
}
