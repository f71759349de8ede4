// rules.rs — movement rules for pacmans and ghosts
//
// Pure functions over BoardState; the caller holds the board's write lock.
// A command applies its direction up to `turns` times in one call; a step
// blocked by a wall or the grid edge abandons the remaining turns.

use crate::board::{Board, BoardState, Command, EMPTY, GHOST, PACMAN, WALL};

/// Points scored per dot eaten.
pub const DOT_POINTS: i32 = 10;

/// Outcome of one `move_pacman` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Ok,
    ReachedPortal,
    DeadPacman,
}

/// Apply one command to the pacman at `idx`.
pub fn move_pacman(board: &Board, state: &mut BoardState, idx: usize, cmd: Command) -> MoveResult {
    for _ in 0..cmd.turns {
        let cur = state.pacmans[idx].pos;
        let next = cmd.dir.step(cur);
        if !board.in_bounds(next) || state.cells[board.idx(next)].base == WALL {
            break;
        }

        if state.ghosts.iter().any(|g| g.pos == next) {
            state.cells[board.idx(cur)].base = EMPTY;
            state.pacmans[idx].alive = false;
            return MoveResult::DeadPacman;
        }

        state.cells[board.idx(cur)].base = EMPTY;
        let ni = board.idx(next);
        state.pacmans[idx].pos = next;
        state.cells[ni].base = PACMAN;

        if state.cells[ni].has_dot {
            state.cells[ni].has_dot = false;
            state.pacmans[idx].points += DOT_POINTS;
        }
        if state.cells[ni].has_portal {
            return MoveResult::ReachedPortal;
        }
    }
    MoveResult::Ok
}

/// Apply one scripted command to the ghost at `idx`. Ghosts never fail to
/// move in a meaningful way: blocked steps are simply dropped.
pub fn move_ghost(board: &Board, state: &mut BoardState, idx: usize, cmd: Command) {
    for _ in 0..cmd.turns {
        let cur = state.ghosts[idx].pos;
        let next = cmd.dir.step(cur);
        if !board.in_bounds(next) || state.cells[board.idx(next)].base == WALL {
            break;
        }

        // A ghost reaching the pacman kills it where it stands.
        if let Some(pacman) = state
            .pacmans
            .iter_mut()
            .find(|p| p.alive && p.pos == next)
        {
            pacman.alive = false;
        }

        // Vacate the old cell; keep the glyph if another ghost shares it.
        let still_occupied = state
            .ghosts
            .iter()
            .enumerate()
            .any(|(i, g)| i != idx && g.pos == cur);
        if !still_occupied {
            state.cells[board.idx(cur)].base = EMPTY;
        }

        let ni = board.idx(next);
        state.ghosts[idx].pos = next;
        // Standing on a dot holds it; the overlay shows it again on leave.
        state.ghosts[idx].charged = state.cells[ni].has_dot;
        state.cells[ni].base = GHOST;
    }
}
