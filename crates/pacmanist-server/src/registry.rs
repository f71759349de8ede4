// registry.rs — fixed slot table mapping sessions to live boards and
// client identities
//
// One slot per worker, for the worker's lifetime. The board column and the
// identity column are independent: a worker claims the identity as soon as
// it dequeues a request, but the board pointer only becomes Live once
// load_level has succeeded. The Reserved state closes the window in
// between; reports skip it.

use std::sync::Arc;

use parking_lot::Mutex;

use pacmanist_game::board::{Board, Pos};

/// Board column of one slot.
#[derive(Clone, Default)]
pub enum SlotState {
    #[default]
    Free,
    /// Worker has dequeued a request but no board is loaded yet.
    Reserved,
    Live(Arc<Board>),
}

/// One live session as captured for a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub slot: usize,
    pub level: String,
    pub width: i32,
    pub height: i32,
    pub pacman: Pos,
    pub points: i32,
}

struct Slots {
    boards: Vec<SlotState>,
    identities: Vec<Option<String>>,
}

pub struct Registry {
    max_sessions: usize,
    slots: Mutex<Slots>,
}

impl Registry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            slots: Mutex::new(Slots {
                boards: vec![SlotState::Free; max_sessions],
                identities: vec![None; max_sessions],
            }),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Mark a free slot as occupied ahead of the level load.
    pub fn reserve(&self, slot: usize) {
        let mut slots = self.slots.lock();
        debug_assert!(matches!(slots.boards[slot], SlotState::Free));
        slots.boards[slot] = SlotState::Reserved;
    }

    /// Publish the loaded board for a reserved slot.
    pub fn publish(&self, slot: usize, board: Arc<Board>) {
        let mut slots = self.slots.lock();
        debug_assert!(matches!(slots.boards[slot], SlotState::Reserved));
        slots.boards[slot] = SlotState::Live(board);
    }

    /// Return a reserved or live slot to the free pool.
    pub fn retire(&self, slot: usize) {
        let mut slots = self.slots.lock();
        debug_assert!(!matches!(slots.boards[slot], SlotState::Free));
        slots.boards[slot] = SlotState::Free;
    }

    /// Atomically claim `name` for `slot` unless another slot already holds
    /// it. Two sessions never share a client identity.
    pub fn claim_identity(&self, slot: usize, name: &str) -> bool {
        let mut slots = self.slots.lock();
        let taken = slots
            .identities
            .iter()
            .enumerate()
            .any(|(i, id)| i != slot && id.as_deref() == Some(name));
        if taken {
            return false;
        }
        slots.identities[slot] = Some(name.to_owned());
        true
    }

    pub fn release_identity(&self, slot: usize) {
        self.slots.lock().identities[slot] = None;
    }

    /// Copy every Live slot for reporting. The Arc handles are cloned under
    /// the registry mutex and the board locks are taken only after it is
    /// released; the two lock families are never held together. A board
    /// retired between the two steps may still appear in one report.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let live: Vec<(usize, Arc<Board>)> = {
            let slots = self.slots.lock();
            slots
                .boards
                .iter()
                .enumerate()
                .filter_map(|(i, s)| match s {
                    SlotState::Live(board) => Some((i, Arc::clone(board))),
                    _ => None,
                })
                .collect()
        };

        live.into_iter()
            .map(|(slot, board)| {
                let state = board.state.read();
                let (pacman, points) = state
                    .pacmans
                    .first()
                    .map(|p| (p.pos, p.points))
                    .unwrap_or((Pos::new(0, 0), 0));
                SnapshotEntry {
                    slot,
                    level: board.name.clone(),
                    width: board.width,
                    height: board.height,
                    pacman,
                    points,
                }
            })
            .collect()
    }
}
