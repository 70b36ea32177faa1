//! A front-end asset pipeline.
//!
//! Source assets (SCSS, markup with `@@include` directives, scripts, raster
//! images, SVG icons, TrueType fonts and verbatim resources) are turned into a
//! deployable output directory by a graph of [`Task`]s. The same graph runs as
//! a one-off production build or as a development [`Session`] with a static
//! file server, a file watcher and live reload.
//!
//! ```rust,no_run
//! use kumitate::{Config, Environment, Pipeline, pipeline};
//!
//! let config = Config::load(None)?;
//! let pipeline = Pipeline::new(pipeline::standard(&config))?;
//! let diagnostics = pipeline.run(&Environment::build())?;
//! assert!(diagnostics.is_success());
//! # Ok::<(), kumitate::KumitateError>(())
//! ```

#![forbid(unsafe_code)]

mod blueprint;
pub mod cli;
mod config;
mod core;
mod error;
mod namespace;
pub mod pipeline;
mod report;
mod runner;
mod task;
pub mod tasks;
mod utils;

pub use crate::blueprint::{Pipeline, Step, WatchBinding, parallel, series};
pub use crate::config::{CONFIG_FILE, Config, Paths, Server, Tools};
pub use crate::core::{Environment, Mode};
pub use crate::error::*;
pub use crate::namespace::{Claim, ClaimError};
pub use crate::runner::{Diagnostics, Outcome, TaskExecution};
#[cfg(feature = "live")]
pub use crate::runner::{Bindings, LiveReload, Rebuild, Session};
pub use crate::task::{Report, Task, TaskContext};
pub use crate::utils::init_logging;
