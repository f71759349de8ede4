// report.rs — SIGUSR1-triggered session report
//
// The signal handler only sets a flag; the registrar notices it between
// operations and calls write_report, which snapshots the registry and
// overwrites the report file with the top sessions ranked by points.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use crate::registry::Registry;

/// Where reports land, relative to the working directory.
pub const REPORT_PATH: &str = "server_log.txt";

/// Entries listed per report.
const TOP_N: usize = 5;

pub fn write_report(path: &Path, registry: &Registry) -> io::Result<()> {
    let mut entries = registry.snapshot();
    entries.sort_by(|a, b| b.points.cmp(&a.points));

    let mut out = String::new();
    let _ = writeln!(out, "PacmanIST server report (pid {})", std::process::id());
    let _ = writeln!(out, "Live sessions: {}", entries.len());
    for (rank, e) in entries.iter().take(TOP_N).enumerate() {
        let _ = writeln!(
            out,
            "{}. slot {} level {} {}x{} pacman ({},{}) points {}",
            rank + 1,
            e.slot,
            e.level,
            e.width,
            e.height,
            e.pacman.x,
            e.pacman.y,
            e.points
        );
    }
    fs::write(path, out)
}
