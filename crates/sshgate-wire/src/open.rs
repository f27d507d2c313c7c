//! Channel-open extra data (RFC 4254 sections 6.3.2, 7.1, 7.2 and the
//! OpenSSH `streamlocal` extensions).

use bytes::{BufMut, BytesMut};

use crate::codec::{Payload, Reader, WireWrite};
use crate::error::Result;

/// `forwarded-tcpip` open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedTcpIp {
    /// Address that was connected on the server.
    pub connected_address: String,
    /// Port that was connected on the server.
    pub connected_port: u32,
    /// Address of the connecting peer.
    pub originator_address: String,
    /// Port of the connecting peer.
    pub originator_port: u32,
}

impl Payload for ForwardedTcpIp {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.connected_address);
        buf.put_u32(self.connected_port);
        buf.put_ssh_string(&self.originator_address);
        buf.put_u32(self.originator_port);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            connected_address: reader.read_string("ConnectedAddress")?,
            connected_port: reader.read_u32("ConnectedPort")?,
            originator_address: reader.read_string("OriginatorAddress")?,
            originator_port: reader.read_u32("OriginatorPort")?,
        })
    }
}

/// `direct-tcpip` open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTcpIp {
    /// Host the client wants to reach.
    pub host_to_connect: String,
    /// Port the client wants to reach.
    pub port_to_connect: u32,
    /// Address of the client-side peer.
    pub originator_address: String,
    /// Port of the client-side peer.
    pub originator_port: u32,
}

impl Payload for DirectTcpIp {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.host_to_connect);
        buf.put_u32(self.port_to_connect);
        buf.put_ssh_string(&self.originator_address);
        buf.put_u32(self.originator_port);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            host_to_connect: reader.read_string("HostToConnect")?,
            port_to_connect: reader.read_u32("PortToConnect")?,
            originator_address: reader.read_string("OriginatorAddress")?,
            originator_port: reader.read_u32("OriginatorPort")?,
        })
    }
}

/// `x11` open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11Open {
    /// Address of the X11 client.
    pub originator_address: String,
    /// Port of the X11 client.
    pub originator_port: u32,
}

impl Payload for X11Open {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.originator_address);
        buf.put_u32(self.originator_port);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            originator_address: reader.read_string("OriginatorAddress")?,
            originator_port: reader.read_u32("OriginatorPort")?,
        })
    }
}

/// `forwarded-streamlocal@openssh.com` open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedStreamLocal {
    /// Socket path the connection arrived on.
    pub socket_path: String,
    /// Reserved, empty.
    pub reserved: String,
}

impl Payload for ForwardedStreamLocal {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.socket_path);
        buf.put_ssh_string(&self.reserved);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            socket_path: reader.read_string("SocketPath")?,
            reserved: reader.read_string("Reserved")?,
        })
    }
}

/// `direct-streamlocal@openssh.com` open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectStreamLocal {
    /// Socket path the client wants to reach.
    pub socket_path: String,
    /// Reserved, empty.
    pub reserved: String,
    /// Reserved, zero.
    pub reserved_port: u32,
}

impl DirectStreamLocal {
    /// Payload for a path with the reserved fields zeroed.
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            reserved: String::new(),
            reserved_port: 0,
        }
    }
}

impl Payload for DirectStreamLocal {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ssh_string(&self.socket_path);
        buf.put_ssh_string(&self.reserved);
        buf.put_u32(self.reserved_port);
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            socket_path: reader.read_string("SocketPath")?,
            reserved: reader.read_string("Reserved")?,
            reserved_port: reader.read_u32("ReservedPort")?,
        })
    }
}
