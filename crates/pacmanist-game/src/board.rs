// board.rs — board, pacman, and ghost state shared by a session's actors
//
// A Board splits into immutable geometry (width, height, tempo, level name)
// and a BoardState behind the reader/writer lock. Actors take the write
// lock to mutate positions and the read lock to emit snapshots; the
// per-session shutdown flag lives inside the same state so every actor
// observes it under the lock it already holds.

use parking_lot::RwLock;

// Display glyphs. The wire carries these bytes verbatim.
pub const EMPTY: u8 = b' ';
pub const WALL: u8 = b'#';
pub const DOT: u8 = b'.';
pub const PORTAL: u8 = b'@';
pub const PACMAN: u8 = b'C';
pub const GHOST: u8 = b'M';
pub const GHOST_CHARGED: u8 = b'm';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Up,
    Left,
    Down,
    Right,
}

impl Dir {
    /// Map a W/A/S/D command byte (either case) to a direction.
    pub fn from_command(c: u8) -> Option<Dir> {
        match c.to_ascii_uppercase() {
            b'W' => Some(Dir::Up),
            b'A' => Some(Dir::Left),
            b'S' => Some(Dir::Down),
            b'D' => Some(Dir::Right),
            _ => None,
        }
    }

    pub fn step(self, from: Pos) -> Pos {
        match self {
            Dir::Up => Pos::new(from.x, from.y - 1),
            Dir::Left => Pos::new(from.x - 1, from.y),
            Dir::Down => Pos::new(from.x, from.y + 1),
            Dir::Right => Pos::new(from.x + 1, from.y),
        }
    }
}

/// One scripted or client-issued move: a direction applied `turns` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub dir: Dir,
    pub turns: u32,
}

impl Command {
    pub fn once(dir: Dir) -> Self {
        Self { dir, turns: 1 }
    }
}

/// Cyclic list of scripted moves, consumed modulo its length.
#[derive(Debug, Clone, Default)]
pub struct MoveTape {
    steps: Vec<Command>,
    cursor: usize,
}

impl MoveTape {
    pub fn new(steps: Vec<Command>) -> Self {
        Self { steps, cursor: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Next step, or None for an empty tape.
    pub fn advance(&mut self) -> Option<Command> {
        if self.steps.is_empty() {
            return None;
        }
        let cmd = self.steps[self.cursor % self.steps.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some(cmd)
    }
}

/// One grid cell: a base display byte plus two orthogonal overlays. A dot
/// or portal shows through only while the base is [`EMPTY`].
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub base: u8,
    pub has_dot: bool,
    pub has_portal: bool,
}

impl Cell {
    pub fn empty() -> Self {
        Self {
            base: EMPTY,
            has_dot: false,
            has_portal: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pacman {
    pub pos: Pos,
    pub alive: bool,
    pub points: i32,
    pub tape: MoveTape,
}

#[derive(Debug, Clone)]
pub struct Ghost {
    pub pos: Pos,
    /// Step divisor: the ghost ticks every `tempo * (1 + passo)` ms.
    pub passo: i32,
    /// Set while the ghost stands on a dot it picked up; snapshots re-stamp
    /// the ghost's cell with [`GHOST_CHARGED`] while this holds.
    pub charged: bool,
    pub tape: MoveTape,
}

/// Everything the actors mutate, behind the board lock.
#[derive(Debug)]
pub struct BoardState {
    pub cells: Vec<Cell>,
    pub pacmans: Vec<Pacman>,
    pub ghosts: Vec<Ghost>,
    /// Flipped under the write lock when the session tears the level down.
    pub shutdown: bool,
}

pub struct Board {
    /// Level name, as the `.lvl` file name.
    pub name: String,
    pub width: i32,
    pub height: i32,
    /// Base tick length in milliseconds.
    pub tempo: i32,
    pub state: RwLock<BoardState>,
}

impl Board {
    pub fn in_bounds(&self, p: Pos) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    /// Row-major cell index; caller checks bounds first.
    pub fn idx(&self, p: Pos) -> usize {
        (p.y * self.width + p.x) as usize
    }

    /// Render the display bytes for a snapshot: base glyphs with the
    /// dot/portal overlays showing through empty cells, then the charged
    /// override re-stamped at every charged ghost's position.
    pub fn render(&self, state: &BoardState) -> Vec<u8> {
        let mut out = Vec::with_capacity(state.cells.len());
        for cell in &state.cells {
            let b = if cell.base == EMPTY {
                if cell.has_portal {
                    PORTAL
                } else if cell.has_dot {
                    DOT
                } else {
                    EMPTY
                }
            } else {
                cell.base
            };
            out.push(b);
        }
        for ghost in &state.ghosts {
            if ghost.charged {
                out[self.idx(ghost.pos)] = GHOST_CHARGED;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_board(width: i32, height: i32) -> Board {
        Board {
            name: "test.lvl".to_owned(),
            width,
            height,
            tempo: 20,
            state: RwLock::new(BoardState {
                cells: vec![Cell::empty(); (width * height) as usize],
                pacmans: Vec::new(),
                ghosts: Vec::new(),
                shutdown: false,
            }),
        }
    }

    #[test]
    fn test_tape_cycles_modulo_length() {
        let mut tape = MoveTape::new(vec![
            Command::once(Dir::Up),
            Command::once(Dir::Down),
        ]);
        let dirs: Vec<Dir> = (0..5).map(|_| tape.advance().unwrap().dir).collect();
        assert_eq!(dirs, [Dir::Up, Dir::Down, Dir::Up, Dir::Down, Dir::Up]);
    }

    #[test]
    fn test_empty_tape_yields_nothing() {
        let mut tape = MoveTape::default();
        assert!(tape.is_empty());
        assert_eq!(tape.advance(), None);
    }

    #[test]
    fn test_render_overlays_show_through_empty_base_only() {
        let board = empty_board(3, 1);
        {
            let mut st = board.state.write();
            st.cells[0].has_dot = true;
            st.cells[1].has_portal = true;
            st.cells[1].has_dot = true; // portal wins over dot
            st.cells[2].base = PACMAN;
            st.cells[2].has_dot = true; // hidden under a non-empty base
        }
        let st = board.state.read();
        assert_eq!(board.render(&st), vec![DOT, PORTAL, PACMAN]);
    }

    #[test]
    fn test_render_restamps_charged_ghosts() {
        // 5x5 board, charged ghost at (2,2): cell index 2*5+2 must read 'm'
        // no matter what the base says.
        let board = empty_board(5, 5);
        {
            let mut st = board.state.write();
            st.cells[12].base = GHOST;
            st.ghosts.push(Ghost {
                pos: Pos::new(2, 2),
                passo: 0,
                charged: true,
                tape: MoveTape::default(),
            });
        }
        let st = board.state.read();
        assert_eq!(board.render(&st)[12], GHOST_CHARGED);
    }

    #[test]
    fn test_render_uncharged_ghost_keeps_base_glyph() {
        let board = empty_board(2, 1);
        {
            let mut st = board.state.write();
            st.cells[1].base = GHOST;
            st.ghosts.push(Ghost {
                pos: Pos::new(1, 0),
                passo: 0,
                charged: false,
                tape: MoveTape::default(),
            });
        }
        let st = board.state.read();
        assert_eq!(board.render(&st), vec![EMPTY, GHOST]);
    }
}
