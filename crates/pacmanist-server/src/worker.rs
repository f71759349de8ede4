// worker.rs — permanent per-slot worker threads
//
// Each worker owns one registry slot for the life of the process: dequeue a
// request, enforce identity uniqueness, open the client's pipes, drive the
// session to completion, release, repeat.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use log::debug;
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};

use pacmanist_common::fifo;
use pacmanist_common::sleep_ms;

use crate::admission::ConnectRequest;
use crate::registry::Registry;
use crate::session;

/// How long a worker holds a duplicate's pipe ends open before dropping
/// them, giving the rejected client time to finish both of its blocking
/// opens.
const DUPLICATE_LINGER_MS: i32 = 200;

/// Spawn one worker per registry slot. Workers run until the process exits
/// (or, in tests, until the admission queue is dropped).
pub fn spawn_pool(
    registry: &Arc<Registry>,
    rx: Receiver<ConnectRequest>,
) -> io::Result<Vec<JoinHandle<()>>> {
    (0..registry.max_sessions())
        .map(|slot| {
            let registry = Arc::clone(registry);
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("worker-{slot}"))
                .spawn(move || worker_loop(slot, &registry, &rx))
        })
        .collect()
}

fn worker_loop(slot: usize, registry: &Registry, rx: &Receiver<ConnectRequest>) {
    mask_report_signal();
    while let Ok(request) = rx.recv() {
        if !registry.claim_identity(slot, &request.req_pipe) {
            kick_duplicate(slot, &request);
            continue;
        }
        if let Err(e) = serve(slot, registry, &request) {
            debug!("slot {slot}: session for {} ended: {e}", request.req_pipe);
        }
        registry.release_identity(slot);
    }
}

/// The same client identity is already live in another slot. Open and then
/// close both of the duplicate's pipes so its blocking opens complete; its
/// next read sees EOF and the request is discarded.
fn kick_duplicate(slot: usize, request: &ConnectRequest) {
    debug!("slot {slot}: duplicate client {}, rejecting", request.req_pipe);
    let req = fifo::open_read_write(Path::new(&request.req_pipe));
    let notif = fifo::open_read_write(Path::new(&request.notif_pipe));
    sleep_ms(DUPLICATE_LINGER_MS);
    drop(req);
    drop(notif);
}

fn serve(slot: usize, registry: &Registry, request: &ConnectRequest) -> io::Result<()> {
    let req_path = Path::new(&request.req_pipe);
    let notif_path = Path::new(&request.notif_pipe);

    let req_fd = fifo::open_read_write(req_path)?;
    fifo::set_nonblocking(&req_fd, true)?;

    // Read-write first so the open cannot block on an absent peer, then
    // trade down to a write-only descriptor. Once the server holds no read
    // end of the notify pipe, a vanished client surfaces as EPIPE on the
    // next snapshot write instead of silently filling the pipe.
    let notif_rw = fifo::open_read_write(notif_path)?;
    let notif_fd = OpenOptions::new().write(true).open(notif_path)?;
    drop(notif_rw);

    session::run(req_fd, notif_fd, &request.level_dir, slot, registry)
}

/// Reports stay on the registrar thread; workers (and the session actors
/// they spawn) never see SIGUSR1.
fn mask_report_signal() {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGUSR1);
    let _ = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None);
}
