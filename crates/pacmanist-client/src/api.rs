// api.rs — client-side connection API
//
// The client owns both per-client FIFOs: it creates them, announces them
// in a CONNECT frame on the server's registration pipe, and then blocks in
// its own opens until a server worker opens the other ends.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pacmanist_common::fifo;
use pacmanist_common::protocol::{BoardFrame, ClientRequest, ConnectFrame};

/// One live session with the server. Dropping the connection removes the
/// client's FIFOs from the filesystem.
pub struct Connection {
    req_pipe: PathBuf,
    notif_pipe: PathBuf,
    req_fd: File,
    notif_fd: File,
}

impl Connection {
    /// Register with the server and wait for a worker to pick the session
    /// up. Blocks until the handshake completes.
    pub fn connect(req_pipe: &Path, notif_pipe: &Path, server_pipe: &Path) -> io::Result<Self> {
        let frame = ConnectFrame::new(
            &req_pipe.to_string_lossy(),
            &notif_pipe.to_string_lossy(),
        )
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        fifo::create(req_pipe)?;
        fifo::create(notif_pipe)?;

        {
            let mut server = OpenOptions::new().write(true).open(server_pipe)?;
            server.write_all(&frame.encode())?;
        }

        // Both opens park until the worker's read-write opens on the far
        // side; a duplicate registration gets an open-then-close instead,
        // after which the first read reports EOF.
        let req_fd = OpenOptions::new().write(true).open(req_pipe)?;
        let notif_fd = File::open(notif_pipe)?;

        Ok(Self {
            req_pipe: req_pipe.to_owned(),
            notif_pipe: notif_pipe.to_owned(),
            req_fd,
            notif_fd,
        })
    }

    /// Send one play command, uppercased on the way out.
    pub fn play(&mut self, command: char) -> io::Result<()> {
        let cmd = command.to_ascii_uppercase() as u8;
        self.req_fd.write_all(&ClientRequest::Play(cmd).encode())
    }

    /// Next board update, or None once the server is gone or the session
    /// has ended.
    pub fn receive_board_update(&mut self) -> Option<BoardFrame> {
        BoardFrame::read_from(&mut self.notif_fd).ok()
    }

    /// Independent handle on the notify stream for a receiver thread.
    pub fn updates(&self) -> io::Result<Updates> {
        Ok(Updates {
            notif_fd: self.notif_fd.try_clone()?,
        })
    }

    /// Tell the server to end the session. Best effort; the session may
    /// already be gone.
    pub fn disconnect(mut self) -> io::Result<()> {
        let _ = self.req_fd.write_all(&ClientRequest::Disconnect.encode());
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.req_pipe);
        let _ = std::fs::remove_file(&self.notif_pipe);
    }
}

/// Read half of a connection, usable from a dedicated receiver thread.
pub struct Updates {
    notif_fd: File,
}

impl Updates {
    pub fn next(&mut self) -> Option<BoardFrame> {
        BoardFrame::read_from(&mut self.notif_fd).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacmanist_common::protocol::{CONNECT_FRAME_LEN, OP_CONNECT};
    use std::io::Read;
    use std::thread;

    /// Drive the server side of the handshake by hand: accept the CONNECT,
    /// open the client's pipes, echo one board, and read the requests.
    #[test]
    fn test_connect_play_disconnect_handshake() {
        let tmp = tempfile::tempdir().unwrap();
        let register = tmp.path().join("register");
        let req = tmp.path().join("c_req");
        let notif = tmp.path().join("c_not");
        fifo::create(&register).unwrap();

        let board = BoardFrame {
            width: 2,
            height: 1,
            tempo: 20,
            victory: 0,
            game_over: 0,
            points: 10,
            cells: b"C.".to_vec(),
        };

        let server = {
            let register = register.clone();
            let board = board.clone();
            thread::spawn(move || {
                let mut reg = fifo::open_read_write(&register).unwrap();
                let mut buf = [0u8; CONNECT_FRAME_LEN];
                reg.read_exact(&mut buf).unwrap();
                assert_eq!(buf[0], OP_CONNECT);

                let mut payload = [0u8; CONNECT_FRAME_LEN - 1];
                payload.copy_from_slice(&buf[1..]);
                let frame = ConnectFrame::decode_payload(&payload);

                let mut req_fd =
                    fifo::open_read_write(Path::new(&frame.req_pipe)).unwrap();
                let mut notif_fd =
                    fifo::open_read_write(Path::new(&frame.notif_pipe)).unwrap();
                notif_fd.write_all(&board.encode()).unwrap();

                let got = ClientRequest::read_from(&mut req_fd).unwrap();
                assert_eq!(got, ClientRequest::Play(b'S'), "command is uppercased");
                let got = ClientRequest::read_from(&mut req_fd).unwrap();
                assert_eq!(got, ClientRequest::Disconnect);
            })
        };

        let mut conn = Connection::connect(&req, &notif, &register).unwrap();
        assert_eq!(conn.receive_board_update(), Some(board));
        conn.play('s').unwrap();
        conn.disconnect().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_drop_removes_the_fifos() {
        let tmp = tempfile::tempdir().unwrap();
        let register = tmp.path().join("register");
        let req = tmp.path().join("c_req");
        let notif = tmp.path().join("c_not");
        fifo::create(&register).unwrap();

        let server = {
            let register = register.clone();
            thread::spawn(move || {
                let mut reg = fifo::open_read_write(&register).unwrap();
                let mut buf = [0u8; CONNECT_FRAME_LEN];
                reg.read_exact(&mut buf).unwrap();
                let mut payload = [0u8; CONNECT_FRAME_LEN - 1];
                payload.copy_from_slice(&buf[1..]);
                let frame = ConnectFrame::decode_payload(&payload);
                // Hold the ends long enough for the client opens to finish.
                let _req = fifo::open_read_write(Path::new(&frame.req_pipe)).unwrap();
                let _notif = fifo::open_read_write(Path::new(&frame.notif_pipe)).unwrap();
                pacmanist_common::sleep_ms(100);
            })
        };

        let conn = Connection::connect(&req, &notif, &register).unwrap();
        drop(conn);
        assert!(!req.exists());
        assert!(!notif.exists());
        server.join().unwrap();
    }
}
