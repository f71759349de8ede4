// session.rs — per-session game engine
//
// One session walks the level directory and plays each level with a small
// actor system over the shared board: an input listener feeding a one-slot
// command mailbox, the pacman actor (the session's only snapshot producer),
// and one actor per ghost. The pacman actor's exit selects the next engine
// step; teardown flips the shutdown flag under the write lock and every
// other actor exits cooperatively within a bounded number of polls.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use pacmanist_common::protocol::{BoardFrame, OP_DISCONNECT, OP_PLAY};
use pacmanist_common::sleep_ms;
use pacmanist_game::board::{Board, Command, Dir, EMPTY};
use pacmanist_game::level::{level_files, load_level};
use pacmanist_game::rules::{move_ghost, move_pacman, MoveResult};

use crate::registry::Registry;

/// How long the listener parks between polls of an idle request pipe.
const LISTENER_POLL: Duration = Duration::from_millis(10);

/// Why the pacman actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacmanExit {
    NextLevel,
    Quit,
    Dead,
}

/// Latest-wins, single-slot inbox for the client's next command.
struct Mailbox(Mutex<Option<u8>>);

impl Mailbox {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    /// An unread command is overwritten.
    fn post(&self, cmd: u8) {
        *self.0.lock() = Some(cmd);
    }

    fn take(&self) -> Option<u8> {
        self.0.lock().take()
    }
}

/// Play every level in `level_dir` for one client, streaming snapshots on
/// `notif_fd` and reading commands from the non-blocking `req_fd`. Returns
/// when the client quits, the pacman dies, the directory is exhausted, or
/// the notify pipe fails.
pub fn run(
    req_fd: File,
    mut notif_fd: File,
    level_dir: &Path,
    slot: usize,
    registry: &Registry,
) -> io::Result<()> {
    let mut accumulated = 0i32;

    for path in level_files(level_dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        registry.reserve(slot);
        let board = match load_level(level_dir, &name, accumulated) {
            Ok(board) => Arc::new(board),
            Err(e) => {
                // Skip the level; points carry across.
                registry.retire(slot);
                debug!("slot {slot}: skipping level {name}: {e}");
                continue;
            }
        };
        registry.publish(slot, Arc::clone(&board));

        let outcome = run_level(&board, &req_fd, &mut notif_fd);
        let points = board
            .state
            .read()
            .pacmans
            .first()
            .map(|p| p.points)
            .unwrap_or(accumulated);
        registry.retire(slot);

        match outcome? {
            PacmanExit::NextLevel => accumulated = points,
            PacmanExit::Quit => {
                // The client is likely gone already; best effort.
                let _ = notif_fd.write_all(&snapshot_frame(&board, 0, 1).encode());
                return Ok(());
            }
            // The pacman actor already sent the game-over frame.
            PacmanExit::Dead => return Ok(()),
        }
    }

    // Level directory exhausted: victory, no map to show.
    let frame = BoardFrame {
        width: 1,
        height: 1,
        tempo: 0,
        victory: 1,
        game_over: 0,
        points: accumulated,
        cells: vec![EMPTY],
    };
    notif_fd.write_all(&frame.encode())?;
    Ok(())
}

/// Run one level's actor system to completion and tear it down. Every
/// spawned actor is joined before this returns, so the board may be freed
/// by the caller.
fn run_level(board: &Board, req_fd: &File, notif_fd: &mut File) -> io::Result<PacmanExit> {
    let mailbox = Mailbox::new();
    thread::scope(|s| {
        s.spawn(|| input_listener(req_fd, board, &mailbox));
        let ghost_count = board.state.read().ghosts.len();
        for idx in 0..ghost_count {
            s.spawn(move || ghost_actor(board, idx));
        }

        let exit = pacman_actor(board, &mailbox, notif_fd);
        board.state.write().shutdown = true;
        exit
    })
}

/// The pacman actor: one snapshot per tick that ran `move_pacman`, plus at
/// most one terminal frame on a death path.
fn pacman_actor(board: &Board, mailbox: &Mailbox, notif: &mut File) -> io::Result<PacmanExit> {
    loop {
        let client_cmd = mailbox.take();
        if let Some(c) = client_cmd {
            if c.eq_ignore_ascii_case(&b'Q') {
                return Ok(PacmanExit::Quit);
            }
        }

        let mut moved = None;
        {
            let mut state = board.state.write();
            // A client command preempts the scripted tape; the tape only
            // advances on ticks with an empty mailbox.
            let command = match client_cmd {
                Some(c) => Dir::from_command(c).map(Command::once),
                None => state.pacmans[0].tape.advance(),
            };
            if let Some(cmd) = command {
                moved = Some(move_pacman(board, &mut state, 0, cmd));
            }
        }

        match moved {
            Some(MoveResult::ReachedPortal) => {
                send_snapshot(board, notif, 0, 0)?;
                return Ok(PacmanExit::NextLevel);
            }
            Some(MoveResult::DeadPacman) => {
                let _ = send_snapshot(board, notif, 0, 1);
                return Ok(PacmanExit::Dead);
            }
            Some(MoveResult::Ok) => send_snapshot(board, notif, 0, 0)?,
            None => {}
        }

        sleep_ms(board.tempo);

        let state = board.state.read();
        if state.shutdown {
            return Ok(PacmanExit::Quit);
        }
        if !state.pacmans[0].alive {
            drop(state);
            // A ghost got the pacman between ticks.
            let _ = send_snapshot(board, notif, 0, 1);
            return Ok(PacmanExit::Dead);
        }
    }
}

fn snapshot_frame(board: &Board, victory: i32, game_over: i32) -> BoardFrame {
    let state = board.state.read();
    BoardFrame {
        width: board.width,
        height: board.height,
        tempo: board.tempo,
        victory,
        game_over,
        points: state.pacmans.first().map(|p| p.points).unwrap_or(0),
        cells: board.render(&state),
    }
}

fn send_snapshot(board: &Board, notif: &mut File, victory: i32, game_over: i32) -> io::Result<()> {
    let frame = snapshot_frame(board, victory, game_over);
    notif.write_all(&frame.encode())
}

/// Read PLAY/DISCONNECT frames from the non-blocking request pipe into the
/// mailbox. DISCONNECT and any read failure become a synthetic 'Q'. The
/// listener honors the shutdown flag between polls, so teardown never waits
/// on a parked read for more than one poll interval.
fn input_listener(req: &File, board: &Board, mailbox: &Mailbox) {
    let mut reader = req;
    loop {
        if board.state.read().shutdown {
            return;
        }
        let mut op = [0u8; 1];
        match reader.read(&mut op) {
            Ok(0) => {
                mailbox.post(b'Q');
                return;
            }
            Ok(_) => match op[0] {
                OP_PLAY => match read_command_byte(reader, board) {
                    Some(cmd) => mailbox.post(cmd),
                    None => {
                        mailbox.post(b'Q');
                        return;
                    }
                },
                OP_DISCONNECT => {
                    mailbox.post(b'Q');
                    return;
                }
                // Stray byte between frames; drop it and resync.
                _ => {}
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(LISTENER_POLL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => {
                mailbox.post(b'Q');
                return;
            }
        }
    }
}

/// The command byte of a PLAY frame follows its opcode in the same atomic
/// pipe write, so this loop rarely spins more than once.
fn read_command_byte(mut reader: &File, board: &Board) -> Option<u8> {
    loop {
        let mut cmd = [0u8; 1];
        match reader.read(&mut cmd) {
            Ok(0) => return None,
            Ok(_) => return Some(cmd[0]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if board.state.read().shutdown {
                    return None;
                }
                thread::sleep(LISTENER_POLL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return None,
        }
    }
}

/// One ghost: sleep its own beat, then take one scripted step under the
/// write lock, bailing out as soon as shutdown is observed.
fn ghost_actor(board: &Board, idx: usize) {
    let passo = board.state.read().ghosts[idx].passo;
    loop {
        sleep_ms(board.tempo * (1 + passo));
        let mut state = board.state.write();
        if state.shutdown {
            return;
        }
        if let Some(cmd) = state.ghosts[idx].tape.advance() {
            move_ghost(board, &mut state, idx, cmd);
        }
    }
}
