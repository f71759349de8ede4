// main.rs — command-line PacmanIST client
//
// A receiver thread prints every board the server streams; the main thread
// feeds commands from stdin or replays a script file until the game ends.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use log::debug;

use pacmanist_client::api::Connection;
use pacmanist_common::protocol::BoardFrame;
use pacmanist_common::sleep_ms;

/// Pause between scripted commands, matching the reference client's pace.
const SCRIPT_STEP_MS: i32 = 50;

/// Command-line client for the PacmanIST server.
#[derive(Parser)]
#[command(name = "pacmanist-client", version)]
struct Args {
    /// Client identifier; the FIFOs land at /tmp/<id>_req and /tmp/<id>_not
    client_id: String,
    /// The server's registration FIFO
    register_pipe: PathBuf,
    /// Optional command script, replayed in a loop; stdin when absent
    script: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let req_pipe = PathBuf::from(format!("/tmp/{}_req", args.client_id));
    let notif_pipe = PathBuf::from(format!("/tmp/{}_not", args.client_id));
    let mut conn = Connection::connect(&req_pipe, &notif_pipe, &args.register_pipe)
        .context("failed to connect to the server")?;
    debug!("connected via {}", args.register_pipe.display());

    let stop = Arc::new(AtomicBool::new(false));
    let mut updates = conn.updates()?;
    let receiver = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while let Some(frame) = updates.next() {
                print_board(&frame);
                if frame.is_terminal() {
                    break;
                }
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let result = command_loop(&mut conn, args.script.as_deref(), &stop);
    let _ = conn.disconnect();
    let _ = receiver.join();
    result
}

fn command_loop(
    conn: &mut Connection,
    script: Option<&Path>,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    if let Some(path) = script {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        while !stop.load(Ordering::SeqCst) {
            if send_commands(conn, text.chars(), stop)? {
                break;
            }
        }
    } else {
        for line in io::stdin().lock().lines() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if send_commands(conn, line?.chars(), stop)? {
                break;
            }
        }
    }
    Ok(())
}

/// Send every command character in `chars`; true means quit.
fn send_commands(
    conn: &mut Connection,
    chars: impl Iterator<Item = char>,
    stop: &AtomicBool,
) -> io::Result<bool> {
    for c in chars {
        if stop.load(Ordering::SeqCst) {
            return Ok(true);
        }
        if c.is_whitespace() {
            continue;
        }
        let c = c.to_ascii_uppercase();
        if c == 'Q' {
            return Ok(true);
        }
        match conn.play(c) {
            Ok(()) => {}
            // The session ended under us; stop sending.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(true),
            Err(e) => return Err(e),
        }
        sleep_ms(SCRIPT_STEP_MS);
    }
    Ok(false)
}

fn print_board(frame: &BoardFrame) {
    println!("=== PACMAN CLIENT ===");
    if frame.game_over != 0 {
        println!(" GAME OVER ");
    } else if frame.victory != 0 {
        println!(" VICTORY ");
    } else {
        println!("Use W/A/S/D to move | Q to quit");
    }
    for y in 0..frame.height as usize {
        let start = y * frame.width as usize;
        let row = &frame.cells[start..start + frame.width as usize];
        println!("{}", String::from_utf8_lossy(row));
    }
    println!("Points: {}", frame.points);
}
