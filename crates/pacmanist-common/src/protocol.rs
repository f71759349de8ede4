// protocol.rs — wire protocol between the PacmanIST server and its clients
//
// Three frame types travel over named pipes, each prefixed by a one-byte
// opcode. All multi-byte integers are 32-bit signed in HOST byte order:
// client and server talk over local FIFOs and are assumed to share a host,
// so neither side performs any endianness conversion.

use std::io::{self, Read};

use thiserror::Error;

/// Client → server on the registration FIFO.
pub const OP_CONNECT: u8 = 1;
/// Client → server on its request FIFO; ends the session.
pub const OP_DISCONNECT: u8 = 2;
/// Client → server on its request FIFO, followed by one command byte.
pub const OP_PLAY: u8 = 3;
/// Server → client on the notify FIFO; a board snapshot.
pub const OP_BOARD: u8 = 4;

/// Fixed width of a pipe-name field in a CONNECT frame. Names shorter than
/// this are zero-padded on the wire.
pub const PIPE_NAME_LEN: usize = 40;

/// Total size of a CONNECT frame: opcode plus two pipe-name fields.
pub const CONNECT_FRAME_LEN: usize = 1 + 2 * PIPE_NAME_LEN;

/// Size of a BOARD frame header: opcode plus six i32 fields. The cell bytes
/// (`width * height` of them) follow immediately after.
pub const BOARD_HEADER_LEN: usize = 1 + 6 * 4;

/// Upper bound on `width * height` accepted by the decoder.
pub const MAX_BOARD_CELLS: i64 = 1 << 20;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the pipe in the middle of a frame.
    #[error("peer closed the pipe mid-frame")]
    Disconnected,
    #[error("unexpected opcode {0:#04x}")]
    BadOpcode(u8),
    #[error("pipe name longer than {PIPE_NAME_LEN} bytes")]
    PipeNameTooLong,
    #[error("bad board dimensions {0}x{1}")]
    BadDimensions(i32, i32),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        // read_exact reports a mid-frame EOF as UnexpectedEof.
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Disconnected
        } else {
            ProtocolError::Io(e)
        }
    }
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn get_i32(buf: &[u8], off: usize) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    i32::from_ne_bytes(b)
}

/// Write `name` into a zero-padded fixed-width field.
fn pack_name(name: &str, field: &mut [u8]) {
    let bytes = name.as_bytes();
    field[..bytes.len()].copy_from_slice(bytes);
}

/// Read a zero-padded fixed-width field back into a string, stopping at the
/// first NUL byte.
fn unpack_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// =============================================================================
// CONNECT
// =============================================================================

/// Registration request: the two per-client pipe paths, zero-padded to
/// [`PIPE_NAME_LEN`] each on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFrame {
    pub req_pipe: String,
    pub notif_pipe: String,
}

impl ConnectFrame {
    pub fn new(req_pipe: &str, notif_pipe: &str) -> Result<Self, ProtocolError> {
        if req_pipe.len() > PIPE_NAME_LEN || notif_pipe.len() > PIPE_NAME_LEN {
            return Err(ProtocolError::PipeNameTooLong);
        }
        Ok(Self {
            req_pipe: req_pipe.to_owned(),
            notif_pipe: notif_pipe.to_owned(),
        })
    }

    pub fn encode(&self) -> [u8; CONNECT_FRAME_LEN] {
        let mut buf = [0u8; CONNECT_FRAME_LEN];
        buf[0] = OP_CONNECT;
        pack_name(&self.req_pipe, &mut buf[1..1 + PIPE_NAME_LEN]);
        pack_name(&self.notif_pipe, &mut buf[1 + PIPE_NAME_LEN..]);
        buf
    }

    /// Decode the 80 payload bytes that follow an already-consumed
    /// [`OP_CONNECT`] opcode. The registrar reads the opcode separately so
    /// it can discard stray bytes and resync on the next frame boundary.
    pub fn decode_payload(payload: &[u8; CONNECT_FRAME_LEN - 1]) -> Self {
        Self {
            req_pipe: unpack_name(&payload[..PIPE_NAME_LEN]),
            notif_pipe: unpack_name(&payload[PIPE_NAME_LEN..]),
        }
    }
}

// =============================================================================
// PLAY / DISCONNECT
// =============================================================================

/// A frame on the per-client request FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// One command character; the client uppercases before sending.
    Play(u8),
    Disconnect,
}

impl ClientRequest {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            ClientRequest::Play(cmd) => vec![OP_PLAY, cmd],
            ClientRequest::Disconnect => vec![OP_DISCONNECT],
        }
    }

    /// Blocking decode of one request frame.
    pub fn read_from(r: &mut impl Read) -> Result<Self, ProtocolError> {
        let mut op = [0u8; 1];
        r.read_exact(&mut op)?;
        match op[0] {
            OP_PLAY => {
                let mut cmd = [0u8; 1];
                r.read_exact(&mut cmd)?;
                Ok(ClientRequest::Play(cmd[0]))
            }
            OP_DISCONNECT => Ok(ClientRequest::Disconnect),
            other => Err(ProtocolError::BadOpcode(other)),
        }
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// An authoritative board snapshot, or a terminal frame when `victory` or
/// `game_over` is set. `cells` is `width * height` display bytes in row-major
/// order; it may be empty only on terminal victory frames that carry no map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardFrame {
    pub width: i32,
    pub height: i32,
    pub tempo: i32,
    pub victory: i32,
    pub game_over: i32,
    pub points: i32,
    pub cells: Vec<u8>,
}

impl BoardFrame {
    pub fn is_terminal(&self) -> bool {
        self.victory != 0 || self.game_over != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BOARD_HEADER_LEN + self.cells.len());
        buf.push(OP_BOARD);
        put_i32(&mut buf, self.width);
        put_i32(&mut buf, self.height);
        put_i32(&mut buf, self.tempo);
        put_i32(&mut buf, self.victory);
        put_i32(&mut buf, self.game_over);
        put_i32(&mut buf, self.points);
        buf.extend_from_slice(&self.cells);
        buf
    }

    /// Blocking decode of one BOARD frame, looping internally until the
    /// exact frame size has been consumed.
    pub fn read_from(r: &mut impl Read) -> Result<Self, ProtocolError> {
        let mut header = [0u8; BOARD_HEADER_LEN];
        r.read_exact(&mut header)?;
        if header[0] != OP_BOARD {
            return Err(ProtocolError::BadOpcode(header[0]));
        }

        let width = get_i32(&header, 1);
        let height = get_i32(&header, 5);
        let tempo = get_i32(&header, 9);
        let victory = get_i32(&header, 13);
        let game_over = get_i32(&header, 17);
        let points = get_i32(&header, 21);
        if width < 0 || height < 0 || i64::from(width) * i64::from(height) > MAX_BOARD_CELLS {
            return Err(ProtocolError::BadDimensions(width, height));
        }

        let mut cells = vec![0u8; (width * height) as usize];
        r.read_exact(&mut cells)?;
        Ok(Self {
            width,
            height,
            tempo,
            victory,
            game_over,
            points,
            cells,
        })
    }
}
