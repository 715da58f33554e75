// Output formatting helpers for CLI commands

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a dim success message
pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

/// Print a realization header
pub fn realization_header(id: &str, index: usize, total: usize) {
    eprintln!(
        "\x1b[1;34m  Realization\x1b[0m {} ({}/{})",
        id,
        index + 1,
        total
    );
}

/// Print a submitted task line (indented)
pub fn submitted(stage: &str, task: &str, job_id: Option<u64>, dry_run: bool) {
    let id = match (job_id, dry_run) {
        (Some(id), _) => id.to_string(),
        (None, true) => "dry-run".to_string(),
        (None, false) => "done".to_string(),
    };
    eprintln!(
        "    \x1b[32m+\x1b[0m {:<16} {:<28} \x1b[2m{}\x1b[0m",
        stage, task, id
    );
}

/// Print a skipped task line (indented, dim)
pub fn skipped(stage: &str, task: &str) {
    eprintln!("\x1b[2m    = {:<16} {:<28} exists\x1b[0m", stage, task);
}

/// Print a table row to stdout
pub fn row(columns: &[String]) {
    println!("  {}", columns.join("\t"));
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}
