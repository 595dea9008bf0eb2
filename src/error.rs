//! Session error taxonomy.

use std::fmt;
use std::io;

/// Everything that can go wrong opening or using a [`crate::Session`].
///
/// `no_error` from the original taxonomy has no variant here — success is
/// `Ok(())` / `Ok(value)` as usual in Rust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `bind()` on the data channel found the local port already in use.
    AddressInUse,
    /// The location couldn't be parsed/resolved into a socket address.
    InvalidAddress,
    /// TCP connect was actively refused by the device.
    ConnectionRefused,
    /// A connect, command, or scan read exceeded its configured timeout.
    TimedOut,
    /// The control-channel socket reported the link is down (e.g. cable
    /// pulled, device power loss) — detected via TCP keepalive or a read
    /// error the platform maps to "host unreachable".
    LinkDown,
    /// The control-channel connection dropped after being established.
    ConnectionLost,
    /// Control-channel framing or JSON-RPC-level protocol violation
    /// (bad checksum, malformed envelope, JSON-RPC parse/invalid-request).
    ProtocolError,
    /// The device returned JSON-RPC method-not-found for this call.
    NotSupported,
    /// The device rejected the call's parameters.
    InvalidParams,
    /// The device reported an internal error executing the call.
    DeviceError,
    /// Any I/O or device error that doesn't map to the above.
    Unknown,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AddressInUse => "local address already in use",
            Self::InvalidAddress => "invalid device address",
            Self::ConnectionRefused => "connection refused",
            Self::TimedOut => "operation timed out",
            Self::LinkDown => "link down",
            Self::ConnectionLost => "connection lost",
            Self::ProtocolError => "protocol error",
            Self::NotSupported => "method not supported by device",
            Self::InvalidParams => "invalid parameters",
            Self::DeviceError => "device reported an internal error",
            Self::Unknown => "unknown error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::LinkDown,
            _ => Self::Unknown,
        }
    }
}

/// Maps a JSON-RPC `error.code` to the session error taxonomy (spec §4.5).
pub fn map_device_error_code(code: i64) -> SessionError {
    match code {
        -1 => SessionError::ProtocolError,       // invalid message
        -2 => SessionError::ProtocolError,       // checksum mismatch
        -32700 => SessionError::ProtocolError,    // JSON-RPC parse error
        -32600 => SessionError::ProtocolError,    // JSON-RPC invalid request
        -32601 => SessionError::NotSupported,     // JSON-RPC method not found
        -32602 => SessionError::InvalidParams,    // JSON-RPC invalid params
        -32603 => SessionError::DeviceError,      // JSON-RPC internal error
        _ => SessionError::Unknown,
    }
}

/// Classifies a control-channel receive error raised by the reactor
/// (spec §4.4), using the platform-specific raw OS error code the
/// reference SDK switches on.
pub fn classify_receive_error(e: &io::Error) -> SessionError {
    #[cfg(target_os = "linux")]
    {
        const ENOENT: i32 = 2;
        if e.raw_os_error() == Some(ENOENT) {
            return SessionError::LinkDown;
        }
    }
    #[cfg(target_os = "windows")]
    {
        const ERROR_CONNECTION_ABORTED: i32 = 1236;
        const ERROR_SEM_TIMEOUT: i32 = 121;
        match e.raw_os_error() {
            Some(ERROR_CONNECTION_ABORTED) => return SessionError::LinkDown,
            Some(ERROR_SEM_TIMEOUT) => return SessionError::ConnectionLost,
            _ => {}
        }
    }
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            SessionError::LinkDown
        }
        io::ErrorKind::TimedOut => SessionError::ConnectionLost,
        _ => SessionError::Unknown,
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
