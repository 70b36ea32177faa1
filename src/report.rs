//! The operator-facing failure channel.
//!
//! Every task failure goes through [`task_failed`]. Compiler errors caused by
//! the contents of a source file get a highlighted banner on the console, so
//! they stand out in a long-running watch session; structural errors are
//! logged as plain errors.

use console::style;

use crate::error::TaskError;

pub(crate) fn task_failed(task: &str, error: &TaskError) {
    if error.is_recoverable() {
        tracing::error!(task, "compilation failed");
        eprintln!("{}", banner(task, error));
    } else {
        tracing::error!(task, "{error}");
    }
}

fn banner(task: &str, error: &TaskError) -> String {
    let title = style(format!(" {task} ")).white().on_red().bold();
    let body = error.to_string();
    let rule = style("─".repeat(60)).red();

    format!("{rule}\n{title} {}\n\n{body}\n{rule}", style("error").red())
}
