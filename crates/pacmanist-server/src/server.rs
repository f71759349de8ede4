// server.rs — server lifecycle and the registrar loop
//
// Startup order: ignore SIGPIPE, register the SIGUSR1 report flag, allocate
// the registry and admission queue, spawn the worker pool, create the
// registration FIFO, then run the registrar forever. Only startup failures
// are fatal; everything after `run` begins is per-session.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, info, warn};
use nix::sys::signal::{self, SigHandler, Signal};

use pacmanist_common::fifo;
use pacmanist_common::protocol::{ConnectFrame, CONNECT_FRAME_LEN, OP_CONNECT};

use crate::admission::{AdmissionQueue, ConnectRequest};
use crate::registry::Registry;
use crate::report;
use crate::worker;

/// How long the registrar parks between polls of an idle registration
/// pipe. Also bounds how stale a pending report flag can get while the
/// registrar has nothing to read.
const REGISTRAR_POLL: Duration = Duration::from_millis(50);

/// A CONNECT whose payload never arrives within this window is treated as
/// malformed and discarded.
const FRAME_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ServerConfig {
    pub levels_dir: PathBuf,
    pub max_games: usize,
    pub register_pipe: PathBuf,
    /// Where SIGUSR1 reports land.
    pub report_path: PathBuf,
}

impl ServerConfig {
    pub fn new(levels_dir: PathBuf, max_games: usize, register_pipe: PathBuf) -> Self {
        Self {
            levels_dir,
            max_games,
            register_pipe,
            report_path: report::REPORT_PATH.into(),
        }
    }
}

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    admission: AdmissionQueue,
    report_flag: Arc<AtomicBool>,
    /// Keeps the pool's join handles alive for the life of the server.
    _workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Allocate everything and spawn the worker pool. Startup failures are
    /// the only fatal errors the server knows.
    pub fn start(config: ServerConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(config.max_games >= 1, "max_games must be at least 1");

        ignore_sigpipe().context("failed to ignore SIGPIPE")?;
        let report_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&report_flag))
            .context("failed to install the SIGUSR1 handler")?;

        let registry = Arc::new(Registry::new(config.max_games));
        let admission = AdmissionQueue::new();
        let workers = worker::spawn_pool(&registry, admission.receiver())
            .context("failed to spawn the worker pool")?;
        fifo::create(&config.register_pipe).with_context(|| {
            format!(
                "failed to create the registration FIFO at {}",
                config.register_pipe.display()
            )
        })?;

        Ok(Self {
            config,
            registry,
            admission,
            report_flag,
            _workers: workers,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The registrar: read CONNECT frames off the registration FIFO and
    /// feed the admission queue, servicing the report flag between
    /// operations. Runs until the process exits.
    pub fn run(&self) -> io::Result<()> {
        let reg = fifo::open_read_write(&self.config.register_pipe)?;
        fifo::set_nonblocking(&reg, true)?;
        info!(
            "PacmanIST server ready (pid {}), registering on {}",
            process::id(),
            self.config.register_pipe.display()
        );

        let mut reader = &reg;
        loop {
            self.service_report_flag();
            let mut op = [0u8; 1];
            match reader.read(&mut op) {
                Ok(n) if n > 0 && op[0] == OP_CONNECT => {
                    let mut payload = [0u8; CONNECT_FRAME_LEN - 1];
                    if !self.read_connect_payload(&reg, &mut payload)? {
                        continue;
                    }
                    let frame = ConnectFrame::decode_payload(&payload);
                    debug!("registrar: CONNECT {} / {}", frame.req_pipe, frame.notif_pipe);
                    self.admission.enqueue(
                        ConnectRequest {
                            req_pipe: frame.req_pipe,
                            notif_pipe: frame.notif_pipe,
                            level_dir: self.config.levels_dir.clone(),
                        },
                        || self.service_report_flag(),
                    );
                }
                // A stray non-CONNECT byte is dropped so the stream can
                // resync on the next frame boundary.
                Ok(n) if n > 0 => {}
                Ok(_) => thread::sleep(REGISTRAR_POLL),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(REGISTRAR_POLL)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Collect the 80 payload bytes of a CONNECT. Clients write the whole
    /// frame in one atomic pipe write, so this almost never spins; a frame
    /// that stays short past the timeout is discarded.
    fn read_connect_payload(&self, mut reader: &File, payload: &mut [u8]) -> io::Result<bool> {
        let deadline = Instant::now() + FRAME_TIMEOUT;
        let mut filled = 0;
        while filled < payload.len() {
            match reader.read(&mut payload[filled..]) {
                Ok(n) if n > 0 => filled += n,
                Ok(_) => thread::sleep(Duration::from_millis(5)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.service_report_flag();
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                debug!("registrar: short CONNECT frame discarded");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn service_report_flag(&self) {
        if self.report_flag.load(Ordering::SeqCst) {
            if let Err(e) = report::write_report(&self.config.report_path, &self.registry) {
                warn!("failed to write the session report: {e}");
            }
            self.report_flag.store(false, Ordering::SeqCst);
        }
    }
}

/// A vanished client must surface as EPIPE on write, not kill the server.
fn ignore_sigpipe() -> nix::Result<()> {
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacmanist_client::api::Connection;

    struct TestServer {
        server: Arc<Server>,
        dir: tempfile::TempDir,
    }

    impl TestServer {
        fn register_pipe(&self) -> PathBuf {
            self.dir.path().join("register")
        }

        fn pipes(&self, id: &str) -> (PathBuf, PathBuf) {
            (
                self.dir.path().join(format!("{id}_req")),
                self.dir.path().join(format!("{id}_not")),
            )
        }

        fn wait_live(&self, sessions: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.server.registry.snapshot().len() != sessions {
                assert!(
                    Instant::now() < deadline,
                    "never reached {sessions} live sessions"
                );
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    fn start_server(levels: &[(&str, &str)], max_games: usize) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let level_dir = dir.path().join("levels");
        std::fs::create_dir(&level_dir).unwrap();
        for (name, text) in levels {
            std::fs::write(level_dir.join(name), text).unwrap();
        }

        let mut config =
            ServerConfig::new(level_dir, max_games, dir.path().join("register"));
        config.report_path = dir.path().join("server_log.txt");

        let server = Arc::new(Server::start(config).unwrap());
        {
            let server = Arc::clone(&server);
            thread::spawn(move || {
                let _ = server.run();
            });
        }
        TestServer { server, dir }
    }

    #[test]
    fn test_trivial_victory_end_to_end() {
        let ts = start_server(&[("a.lvl", "50\n###\n#C#\n#@#\n")], 2);
        let (req, notif) = ts.pipes("c1");
        let mut conn = Connection::connect(&req, &notif, &ts.register_pipe()).unwrap();

        conn.play('s').unwrap();
        let first = conn.receive_board_update().expect("post-move board frame");
        assert_eq!((first.victory, first.game_over), (0, 0));
        assert_eq!(first.cells[2 * 3 + 1], b'C', "pacman on the portal cell");

        let terminal = conn.receive_board_update().expect("victory frame");
        assert_eq!((terminal.victory, terminal.game_over), (1, 0));
        assert_eq!(terminal.points, 0);
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        // Endless level: the first session stays live while the duplicate
        // tries to register with the same request-pipe identity.
        let ts = start_server(&[("a.lvl", "20\nC.\n")], 4);
        let (req, notif) = ts.pipes("dup");
        let mut c1 = Connection::connect(&req, &notif, &ts.register_pipe()).unwrap();
        ts.wait_live(1);

        let (_, notif2) = ts.pipes("dup2");
        let mut c2 = Connection::connect(&req, &notif2, &ts.register_pipe()).unwrap();
        assert_eq!(c2.receive_board_update(), None, "duplicate sees EOF");

        // The original session is untouched.
        assert_eq!(ts.server.registry.snapshot().len(), 1);
        c1.play('d').unwrap();
        assert!(c1.receive_board_update().is_some());
        c1.disconnect().unwrap();
    }

    #[test]
    fn test_waiting_client_runs_after_first_disconnects() {
        let ts = start_server(&[("a.lvl", "20\nC.\n")], 1);
        let (req1, notif1) = ts.pipes("c1");
        let c1 = Connection::connect(&req1, &notif1, &ts.register_pipe()).unwrap();
        ts.wait_live(1);

        // The second CONNECT is admitted but must wait for the only slot.
        let (req2, notif2) = ts.pipes("c2");
        let register = ts.register_pipe();
        let c2_join = thread::spawn(move || Connection::connect(&req2, &notif2, &register));

        thread::sleep(Duration::from_millis(200));
        c1.disconnect().unwrap();

        let mut c2 = c2_join.join().unwrap().unwrap();
        c2.play('d').unwrap();
        let frame = c2.receive_board_update().expect("second session serves frames");
        assert_eq!(frame.points, 10);
        c2.disconnect().unwrap();
    }

    #[test]
    fn test_report_flag_writes_ranked_file() {
        let ts = start_server(&[("a.lvl", "20\nC...........\n")], 3);
        let report_path = ts.dir.path().join("server_log.txt");

        let mut clients = Vec::new();
        for (id, steps) in [("r1", 4), ("r2", 10), ("r3", 1)] {
            let (req, notif) = ts.pipes(id);
            let mut conn = Connection::connect(&req, &notif, &ts.register_pipe()).unwrap();
            for _ in 0..steps {
                conn.play('d').unwrap();
                conn.receive_board_update().unwrap();
            }
            clients.push(conn);
        }
        ts.wait_live(3);

        ts.server.report_flag.store(true, Ordering::SeqCst);
        ts.server.service_report_flag();

        let text = std::fs::read_to_string(&report_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "Live sessions: 3");
        assert!(lines[2].contains("points 100"));
        assert!(lines[3].contains("points 40"));
        assert!(lines[4].contains("points 10"));
        assert!(!ts.server.report_flag.load(Ordering::SeqCst), "flag cleared");
        for conn in clients {
            let _ = conn.disconnect();
        }
    }

    #[test]
    fn test_max_games_must_be_positive() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::new(dir.path().join("levels"), 0, dir.path().join("reg"));
        assert!(Server::start(config).is_err());
    }

    #[test]
    fn test_stray_bytes_do_not_break_registration() {
        let ts = start_server(&[("a.lvl", "50\n###\n#C#\n#@#\n")], 1);

        // Garbage ahead of a valid frame is discarded byte by byte.
        {
            use std::io::Write;
            let mut reg = std::fs::OpenOptions::new()
                .write(true)
                .open(ts.register_pipe())
                .unwrap();
            reg.write_all(&[0xff, 0x42]).unwrap();
        }

        let (req, notif) = ts.pipes("c1");
        let mut conn = Connection::connect(&req, &notif, &ts.register_pipe()).unwrap();
        conn.play('S').unwrap();
        assert!(conn.receive_board_update().is_some());
    }
}
