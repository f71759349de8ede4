// level.rs — .lvl file parsing and level-directory enumeration
//
// A level file is plain text:
//
//     <tempo_ms>
//     <grid rows>
//     [pacman <tape>]
//     [ghost <index> <passo> <tape>]
//
// Grid glyphs: '#' wall, '.' dot, '@' portal, 'C' pacman, 'M' ghost,
// 'm' charged ghost, ' ' empty; anything else is kept as a plain base
// glyph. Rows are padded with spaces to the widest row. A tape is a string
// of W/A/S/D steps, each with an optional decimal repeat prefix ("3S").

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

use crate::board::{
    Board, BoardState, Cell, Command, Dir, Ghost, MoveTape, Pacman, Pos, DOT, GHOST,
    GHOST_CHARGED, PACMAN, PORTAL, WALL,
};

/// Patrol tape for ghosts the level file leaves unscripted.
const DEFAULT_GHOST_TAPE: &str = "DDSSAAWW";

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("failed to read level file: {0}")]
    Io(#[from] io::Error),
    #[error("missing or invalid tempo line")]
    BadTempo,
    #[error("level has no grid rows")]
    EmptyGrid,
    #[error("level must contain exactly one pacman, found {0}")]
    PacmanCount(usize),
    #[error("bad directive line: {0:?}")]
    BadDirective(String),
}

/// Load `name` from `dir` into a fresh board. `starting_points` carries the
/// pacman's score across levels (and across skipped ones).
pub fn load_level(dir: &Path, name: &str, starting_points: i32) -> Result<Board, LevelError> {
    let text = fs::read_to_string(dir.join(name))?;
    parse(&text, name, starting_points)
}

/// Enumerate the `.lvl` files of a level directory, skipping hidden
/// entries, in directory-enumeration order.
pub fn level_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !name.ends_with(".lvl") {
            continue;
        }
        out.push(entry.path());
    }
    Ok(out)
}

fn parse(text: &str, name: &str, starting_points: i32) -> Result<Board, LevelError> {
    let mut lines = text.lines();
    let tempo: i32 = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .filter(|&t| t > 0)
        .ok_or(LevelError::BadTempo)?;

    let mut rows: Vec<&str> = Vec::new();
    let mut directives: Vec<&str> = Vec::new();
    let mut in_directives = false;
    for line in lines {
        let trimmed = line.trim();
        if !in_directives {
            if trimmed.starts_with("pacman") || trimmed.starts_with("ghost") {
                in_directives = true;
            } else if trimmed.is_empty() {
                // A blank line ends the grid; leading blanks are skipped.
                in_directives = !rows.is_empty();
                continue;
            } else {
                rows.push(line);
                continue;
            }
        }
        if !trimmed.is_empty() {
            directives.push(trimmed);
        }
    }
    if rows.is_empty() {
        return Err(LevelError::EmptyGrid);
    }

    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0) as i32;
    let height = rows.len() as i32;

    let mut cells = Vec::with_capacity((width * height) as usize);
    let mut pacmans = Vec::new();
    let mut ghosts = Vec::new();
    for (y, row) in rows.iter().enumerate() {
        let mut bytes = row.bytes();
        for x in 0..width {
            let ch = bytes.next().unwrap_or(b' ');
            let pos = Pos::new(x, y as i32);
            let mut cell = Cell::empty();
            match ch {
                b' ' => {}
                WALL => cell.base = WALL,
                DOT => cell.has_dot = true,
                PORTAL => cell.has_portal = true,
                PACMAN => {
                    cell.base = PACMAN;
                    pacmans.push(Pacman {
                        pos,
                        alive: true,
                        points: starting_points,
                        tape: MoveTape::default(),
                    });
                }
                GHOST | GHOST_CHARGED => {
                    cell.base = GHOST;
                    ghosts.push(Ghost {
                        pos,
                        passo: 0,
                        charged: ch == GHOST_CHARGED,
                        tape: MoveTape::default(),
                    });
                }
                other => cell.base = other,
            }
            cells.push(cell);
        }
    }
    if pacmans.len() != 1 {
        return Err(LevelError::PacmanCount(pacmans.len()));
    }

    for line in directives {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("pacman") => {
                let tape = words
                    .next()
                    .ok_or_else(|| LevelError::BadDirective(line.to_owned()))?;
                pacmans[0].tape = MoveTape::new(parse_tape(tape, line)?);
            }
            Some("ghost") => {
                let idx: usize = words
                    .next()
                    .and_then(|w| w.parse().ok())
                    .filter(|&i| i < ghosts.len())
                    .ok_or_else(|| LevelError::BadDirective(line.to_owned()))?;
                let passo: i32 = words
                    .next()
                    .and_then(|w| w.parse().ok())
                    .filter(|&p| p >= 0)
                    .ok_or_else(|| LevelError::BadDirective(line.to_owned()))?;
                let tape = words
                    .next()
                    .ok_or_else(|| LevelError::BadDirective(line.to_owned()))?;
                ghosts[idx].passo = passo;
                ghosts[idx].tape = MoveTape::new(parse_tape(tape, line)?);
            }
            _ => return Err(LevelError::BadDirective(line.to_owned())),
        }
    }

    // Unscripted ghosts patrol a fixed loop.
    let default_tape = parse_tape(DEFAULT_GHOST_TAPE, DEFAULT_GHOST_TAPE)?;
    for ghost in ghosts.iter_mut().filter(|g| g.tape.is_empty()) {
        ghost.tape = MoveTape::new(default_tape.clone());
    }

    Ok(Board {
        name: name.to_owned(),
        width,
        height,
        tempo,
        state: RwLock::new(BoardState {
            cells,
            pacmans,
            ghosts,
            shutdown: false,
        }),
    })
}

fn parse_tape(tape: &str, line: &str) -> Result<Vec<Command>, LevelError> {
    let mut steps = Vec::new();
    let mut repeat: u32 = 0;
    for ch in tape.bytes() {
        if ch.is_ascii_digit() {
            repeat = repeat * 10 + u32::from(ch - b'0');
            continue;
        }
        let dir =
            Dir::from_command(ch).ok_or_else(|| LevelError::BadDirective(line.to_owned()))?;
        steps.push(Command {
            dir,
            turns: repeat.max(1),
        });
        repeat = 0;
    }
    if repeat != 0 || steps.is_empty() {
        return Err(LevelError::BadDirective(line.to_owned()));
    }
    Ok(steps)
}
