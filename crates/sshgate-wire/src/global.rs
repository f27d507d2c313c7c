//! Global request payloads (RFC 4254 section 7, OpenSSH `PROTOCOL` 2.4).

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::codec::{Payload, Reader, WireWrite};
use crate::error::Result;

/// Global request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRequestType {
    /// `keepalive@openssh.com`
    Keepalive,
    /// `tcpip-forward`
    TcpipForward,
    /// `cancel-tcpip-forward`
    CancelTcpipForward,
    /// `streamlocal-forward@openssh.com`
    StreamLocalForward,
    /// `cancel-streamlocal-forward@openssh.com`
    CancelStreamLocalForward,
}

impl GlobalRequestType {
    const ALL: [Self; 5] = [
        Self::Keepalive,
        Self::TcpipForward,
        Self::CancelTcpipForward,
        Self::StreamLocalForward,
        Self::CancelStreamLocalForward,
    ];

    /// The wire name of this request type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Keepalive => "keepalive@openssh.com",
            Self::TcpipForward => "tcpip-forward",
            Self::CancelTcpipForward => "cancel-tcpip-forward",
            Self::StreamLocalForward => "streamlocal-forward@openssh.com",
            Self::CancelStreamLocalForward => "cancel-streamlocal-forward@openssh.com",
        }
    }

    /// Look up a global request type by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for GlobalRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `tcpip-forward` and `cancel-tcpip-forward` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpipForward {
    /// Address to bind on the server side.
    pub address: String,
    /// Port to bind; 0 lets the server choose.
    pub port: u32,
}

impl Payload for TcpipForward {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.address);
        buf.put_u32(self.port);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            address: reader.read_string("Address")?,
            port: reader.read_u32("Port")?,
        })
    }
}

/// `streamlocal-forward@openssh.com` and its cancel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocalForward {
    /// Unix socket path to listen on.
    pub socket_path: String,
}

impl Payload for StreamLocalForward {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.socket_path);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            socket_path: reader.read_string("SocketPath")?,
        })
    }
}
