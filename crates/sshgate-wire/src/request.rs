//! Channel request payloads (RFC 4254 section 6).

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::codec::{Payload, Reader, WireWrite};
use crate::error::{DecodeError, Result};

/// Channel request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// `env`
    Env,
    /// `pty-req`
    Pty,
    /// `shell`
    Shell,
    /// `exec`
    Exec,
    /// `subsystem`
    Subsystem,
    /// `window-change`
    WindowChange,
    /// `signal`
    Signal,
    /// `x11-req`
    X11,
    /// `exit-status`, server to client only.
    ExitStatus,
    /// `exit-signal`, server to client only.
    ExitSignal,
}

impl RequestType {
    const ALL: [Self; 10] = [
        Self::Env,
        Self::Pty,
        Self::Shell,
        Self::Exec,
        Self::Subsystem,
        Self::WindowChange,
        Self::Signal,
        Self::X11,
        Self::ExitStatus,
        Self::ExitSignal,
    ];

    /// The wire name of this request type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Pty => "pty-req",
            Self::Shell => "shell",
            Self::Exec => "exec",
            Self::Subsystem => "subsystem",
            Self::WindowChange => "window-change",
            Self::Signal => "signal",
            Self::X11 => "x11-req",
            Self::ExitStatus => "exit-status",
            Self::ExitSignal => "exit-signal",
        }
    }

    /// Look up a request type by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `env` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRequest {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl Payload for EnvRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.name);
        buf.put_ssh_string(&self.value);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            name: reader.read_string("Name")?,
            value: reader.read_string("Value")?,
        })
    }
}

/// Terminal mode opcode that ends a mode list (RFC 4254 section 8).
pub const TTY_OP_END: u8 = 0;

/// Highest opcode followed by a `uint32` argument; opcodes 160-255 end parsing.
const TTY_OP_MAX_ARGUMENT: u8 = 159;

/// `pty-req` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// `TERM` value.
    pub term: String,
    /// Width in characters.
    pub columns: u32,
    /// Height in rows.
    pub rows: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Encoded terminal modes.
    pub mode_list: Vec<u8>,
}

impl PtyRequest {
    /// Encode `(opcode, argument)` pairs into a terminated mode list.
    #[must_use]
    pub fn encode_modes(modes: &[(u8, u32)]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(modes.len() * 5 + 1);
        for &(opcode, argument) in modes {
            if opcode == TTY_OP_END || opcode > TTY_OP_MAX_ARGUMENT {
                continue;
            }
            buf.put_u8(opcode);
            buf.put_u32(argument);
        }
        buf.put_u8(TTY_OP_END);
        buf.to_vec()
    }

    /// Decode the mode list into `(opcode, argument)` pairs.
    ///
    /// An empty list is accepted. Parsing stops at `TTY_OP_END` or at the
    /// first opcode without a defined argument, as RFC 4254 requires.
    pub fn modes(&self) -> Result<Vec<(u8, u32)>> {
        let mut reader = Reader::new(&self.mode_list);
        let mut modes = Vec::new();
        if reader.remaining() == 0 {
            return Ok(modes);
        }
        loop {
            if reader.remaining() == 0 {
                return Err(DecodeError::UnterminatedModes);
            }
            let opcode = reader.read_u8("ModeList")?;
            if opcode == TTY_OP_END || opcode > TTY_OP_MAX_ARGUMENT {
                return Ok(modes);
            }
            modes.push((opcode, reader.read_u32("ModeList")?));
        }
    }
}

impl Payload for PtyRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.term);
        buf.put_u32(self.columns);
        buf.put_u32(self.rows);
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        buf.put_ssh_bytes(&self.mode_list);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            term: reader.read_string("Term")?,
            columns: reader.read_u32("Columns")?,
            rows: reader.read_u32("Rows")?,
            width: reader.read_u32("Width")?,
            height: reader.read_u32("Height")?,
            mode_list: reader.read_bytes("ModeList")?.to_vec(),
        })
    }
}

/// `exec` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command line to run.
    pub exec: String,
}

impl ExecRequest {
    /// Encode a raw command as received from a client, which may not be UTF-8.
    #[must_use]
    pub fn encode_raw(command: &[u8]) -> bytes::Bytes {
        let mut buf = BytesMut::with_capacity(command.len() + 4);
        buf.put_ssh_bytes(command);
        buf.freeze()
    }
}

impl Payload for ExecRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.exec);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            exec: reader.read_string("Exec")?,
        })
    }
}

/// `subsystem` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRequest {
    /// Subsystem name, e.g. `sftp`.
    pub subsystem: String,
}

impl Payload for SubsystemRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.subsystem);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            subsystem: reader.read_string("Subsystem")?,
        })
    }
}

/// `window-change` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    /// Width in characters.
    pub columns: u32,
    /// Height in rows.
    pub rows: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Payload for WindowChange {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.columns);
        buf.put_u32(self.rows);
        buf.put_u32(self.width);
        buf.put_u32(self.height);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            columns: reader.read_u32("Columns")?,
            rows: reader.read_u32("Rows")?,
            width: reader.read_u32("Width")?,
            height: reader.read_u32("Height")?,
        })
    }
}

/// `signal` request. The name has no `SIG` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    /// Signal name, e.g. `TERM`.
    pub signal: String,
}

impl Payload for SignalRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.signal);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            signal: reader.read_string("Signal")?,
        })
    }
}

/// `x11-req` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11Request {
    /// Forward only a single connection.
    pub single_connection: bool,
    /// Authentication protocol, e.g. `MIT-MAGIC-COOKIE-1`.
    pub auth_protocol: String,
    /// Hex-encoded authentication cookie.
    pub auth_cookie: String,
    /// X11 screen number.
    pub screen_number: u32,
}

impl Payload for X11Request {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_bool(self.single_connection);
        buf.put_ssh_string(&self.auth_protocol);
        buf.put_ssh_string(&self.auth_cookie);
        buf.put_u32(self.screen_number);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            single_connection: reader.read_bool("SingleConnection")?,
            auth_protocol: reader.read_string("AuthProtocol")?,
            auth_cookie: reader.read_string("AuthCookie")?,
            screen_number: reader.read_u32("ScreenNumber")?,
        })
    }
}

/// `exit-status` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Program exit code.
    pub exit_status: u32,
}

impl Payload for ExitStatus {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.exit_status);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            exit_status: reader.read_u32("ExitStatus")?,
        })
    }
}

/// `exit-signal` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    /// Signal name without the `SIG` prefix.
    pub signal: String,
    /// Whether a core dump was produced.
    pub core_dumped: bool,
    /// Human-readable error message.
    pub error_message: String,
    /// RFC 3066 language tag of the message.
    pub language_tag: String,
}

impl Payload for ExitSignal {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.signal);
        buf.put_ssh_bool(self.core_dumped);
        buf.put_ssh_string(&self.error_message);
        buf.put_ssh_string(&self.language_tag);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            signal: reader.read_string("Signal")?,
            core_dumped: reader.read_bool("CoreDumped")?,
            error_message: reader.read_string("ErrorMessage")?,
            language_tag: reader.read_string("LanguageTag")?,
        })
    }
}
