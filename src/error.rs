use camino::Utf8PathBuf;
use thiserror::Error;

use crate::namespace::ClaimError;

#[derive(Debug, Error)]
pub enum KumitateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid pipeline:\n{0}")]
    Claim(#[from] ClaimError),

    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Error while running the pipeline:\n{0}")]
    Run(#[from] anyhow::Error),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),
}

/// The single error type every task returns.
///
/// Errors are split into two classes: recoverable compiler errors, which are
/// surfaced through the console notification and leave a watch session
/// running, and structural errors such as missing files or I/O failures.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Markup(#[from] MarkupError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Sprite(#[from] SpriteError),

    #[error(transparent)]
    Font(#[from] FontError),

    #[error(transparent)]
    Clean(#[from] CleanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Task panicked: {0}")]
    Panic(String),
}

impl TaskError {
    /// Compiler and bundler errors caused by the contents of a source file.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TaskError::Style(StyleError::Sass(_) | StyleError::Css(..))
                | TaskError::Script(ScriptError::Esbuild(_))
        )
    }
}

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// Prefixing or minification of the compiled CSS failed.
    #[error("CSS error in '{0}': {1}")]
    Css(Utf8PathBuf, String),

    #[error("Invalid browserslist query '{0}': {1}")]
    Browsers(String, String),

    #[error("Source map error: {0}")]
    SourceMap(String),
}

/// Errors that can occur when assembling markup includes.
#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("Couldn't read markup entry '{0}'.\n{1}")]
    Entry(Utf8PathBuf, std::io::Error),

    #[error("Include '{include}' in '{from}' couldn't be resolved.\n{source}")]
    Missing {
        include: Utf8PathBuf,
        from: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Include cycle: {0}")]
    Cycle(String),

    #[error("Invalid include parameters in '{0}': {1}")]
    Params(Utf8PathBuf, serde_json::Error),
}

/// Errors that can occur when bundling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script entry '{0}' not found")]
    Entry(Utf8PathBuf),

    /// The bundler binary couldn't be started.
    #[error("Couldn't run '{0}'. Is it installed and on PATH?\n{1}")]
    Spawn(String, std::io::Error),

    /// The Esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed:\n{0}")]
    Esbuild(String),
}

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image decoding or encoding.
    #[error("Image processing error in '{0}': {1}")]
    Image(Utf8PathBuf, image::ImageError),

    #[error("Couldn't write cache metadata: {0}")]
    Metadata(String),
}

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("'{0}' has no root <svg> element")]
    NotSvg(Utf8PathBuf),

    #[error("Icons '{0}' and '{1}' map to the same id '{2}'")]
    DuplicateId(Utf8PathBuf, Utf8PathBuf, String),
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("'{0}' is not an sfnt font: {1}")]
    Malformed(Utf8PathBuf, &'static str),

    #[error("'{0}' is a font collection, which can't be converted")]
    Collection(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Failed to remove '{0}'.\n{1}")]
    Remove(Utf8PathBuf, std::io::Error),

    #[error("Failed to create the output directory '{0}'.\n{1}")]
    Create(Utf8PathBuf, std::io::Error),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch glob '{0}': {1}")]
    Resolve(String, anyhow::Error),

    #[error(transparent)]
    Recv(#[from] std::sync::mpsc::RecvError),

    #[error("The session is already serving")]
    AlreadyServing,
}
