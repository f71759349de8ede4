// main.rs — PacmanIST server binary

use std::path::PathBuf;

use clap::Parser;

use pacmanist_server::server::{Server, ServerConfig};

/// Multi-session Pacman game server over named pipes.
#[derive(Parser)]
#[command(name = "pacmanist-server", version)]
struct Args {
    /// Directory containing the .lvl level files
    levels_dir: PathBuf,
    /// Maximum number of simultaneous game sessions
    max_games: usize,
    /// Path of the registration FIFO to create
    register_pipe: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let server = Server::start(ServerConfig::new(
        args.levels_dir,
        args.max_games,
        args.register_pipe,
    ))?;
    server.run()?;
    Ok(())
}
