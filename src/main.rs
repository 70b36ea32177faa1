//! kumitate - front-end asset pipeline with a live-reloading dev server

use std::process::ExitCode;

fn main() -> ExitCode {
    kumitate::cli::run()
}
