// lib.rs — shared plumbing for the PacmanIST server and client

pub mod fifo;
pub mod protocol;

use std::thread;
use std::time::Duration;

/// Sleep for `ms` milliseconds. Tick pacing helper shared by the server
/// actors and the scripted client. Negative values sleep not at all.
pub fn sleep_ms(ms: i32) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}
