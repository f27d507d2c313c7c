//! Channel types and open-failure reasons.

use std::fmt;

/// SSH channel type (RFC 4254 section 5.1, OpenSSH streamlocal extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Interactive or one-shot program session.
    Session,
    /// Client-requested outbound TCP connection.
    DirectTcpIp,
    /// Server-initiated channel for a reverse-forwarded TCP connection.
    ForwardedTcpIp,
    /// Server-initiated X11 connection.
    X11,
    /// Client-requested outbound Unix socket connection.
    DirectStreamLocal,
    /// Server-initiated channel for a reverse-forwarded Unix socket.
    ForwardedStreamLocal,
}

impl ChannelType {
    /// All known channel types.
    pub const ALL: [Self; 6] = [
        Self::Session,
        Self::DirectTcpIp,
        Self::ForwardedTcpIp,
        Self::X11,
        Self::DirectStreamLocal,
        Self::ForwardedStreamLocal,
    ];

    /// The wire name of this channel type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::DirectTcpIp => "direct-tcpip",
            Self::ForwardedTcpIp => "forwarded-tcpip",
            Self::X11 => "x11",
            Self::DirectStreamLocal => "direct-streamlocal@openssh.com",
            Self::ForwardedStreamLocal => "forwarded-streamlocal@openssh.com",
        }
    }

    /// Look up a channel type by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code sent in `SSH_MSG_CHANNEL_OPEN_FAILURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`
    AdministrativelyProhibited,
    /// `SSH_OPEN_CONNECT_FAILED`
    ConnectFailed,
    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`
    UnknownChannelType,
    /// `SSH_OPEN_RESOURCE_SHORTAGE`
    ResourceShortage,
}

impl RejectionReason {
    /// Numeric reason code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::AdministrativelyProhibited => 1,
            Self::ConnectFailed => 2,
            Self::UnknownChannelType => 3,
            Self::ResourceShortage => 4,
        }
    }

    /// Map a numeric reason code back to a reason.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdministrativelyProhibited => "administratively prohibited",
            Self::ConnectFailed => "connect failed",
            Self::UnknownChannelType => "unknown channel type",
            Self::ResourceShortage => "resource shortage",
        };
        f.write_str(name)
    }
}
