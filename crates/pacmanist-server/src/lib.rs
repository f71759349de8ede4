// lib.rs — PacmanIST server: session registry, admission queue, worker
// pool, per-session game engine, and the SIGUSR1 report path

pub mod admission;
pub mod registry;
pub mod report;
pub mod server;
pub mod session;
pub mod worker;
