#![cfg_attr(docsrs, feature(doc_cfg))]

//! # rfpeer: single-peer Bluetooth stream connections
//!
//! This library manages the lifecycle of exactly one peer-to-peer stream
//! connection over a connection-oriented transport such as Bluetooth RFCOMM.
//!
//! This library depends on the [tokio] asynchronous runtime.
//!
//! A [Manager] owns the connection and arbitrates between three roles:
//!
//! * **listening** for an inbound connection, once for each [Security] kind,
//! * **connecting** to a remote [Peer],
//! * **pumping** data over the established stream.
//!
//! Whichever of an inbound accept or an outbound connect completes first is
//! promoted to the established connection and the other roles are cancelled.
//! A failed connection attempt or a dropped connection returns the manager to
//! listening automatically.
//!
//! State changes and data are published as [ConnectionEvent]s through
//! [Manager::events].
//!
//! ## Crate features
//! The following crate features are available.
//!
//! * `rfcomm`: Enables the [RFCOMM transport](rfcomm) based on BlueR sockets.
//! * `serde`: Enables serialization and deserialization of some data types.
//!
//! ## Basic usage
//! Implement [Transport] or use [rfcomm::RfcommTransport], create a [Manager]
//! using [Manager::new], subscribe to [Manager::events] and call
//! [Manager::start]. Use [Manager::connect] to reach out to a peer and
//! [Manager::write] to send data once connected.

#![warn(missing_docs)]

use macaddr::MacAddr6;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

mod config;
mod event;
mod manager;
mod peer;
mod role;
mod transport;

#[cfg(feature = "rfcomm")]
#[cfg_attr(docsrs, doc(cfg(feature = "rfcomm")))]
pub mod rfcomm;

#[cfg(test)]
mod mock;

pub use crate::{
    config::Config,
    event::{ConnectionEvent, ConnectionState},
    manager::{Manager, Snapshot},
    peer::Peer,
    transport::{Listener, Security, Transport},
};

/// Connection error.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed error message, usually provided by the transport.
    pub message: String,
}

/// Connection error kind.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// listening for connections failed
    ListenFailed,
    /// accepting a connection failed
    AcceptFailed,
    /// connection attempt failed
    ConnectFailed,
    /// connection lost
    ConnectionLost,
    /// writing to connection failed
    WriteFailed,
    /// invalid Bluetooth address: {0}
    InvalidAddress(String),
    /// IO error {0:?}
    Io(std::io::ErrorKind),
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    /// Wraps a transport error, classifying it as the specified kind.
    pub(crate) fn with_io(kind: ErrorKind, err: &std::io::Error) -> Self {
        Self { kind, message: err.to_string() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self { kind: ErrorKind::Io(err.kind()), message: err.to_string() }
    }
}

impl From<InvalidAddress> for Error {
    fn from(err: InvalidAddress) -> Self {
        Self::new(ErrorKind::InvalidAddress(err.0))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind as E;
        let kind = match err.kind {
            ErrorKind::ListenFailed => E::AddrNotAvailable,
            ErrorKind::AcceptFailed => E::ConnectionAborted,
            ErrorKind::ConnectFailed => E::ConnectionRefused,
            ErrorKind::ConnectionLost => E::ConnectionReset,
            ErrorKind::WriteFailed => E::BrokenPipe,
            ErrorKind::InvalidAddress(_) => E::InvalidInput,
            ErrorKind::Io(kind) => kind,
        };
        std::io::Error::new(kind, err)
    }
}

/// Connection result.
pub type Result<T> = std::result::Result<T, Error>;

/// Bluetooth device address.
///
/// Written in colon-hexadecimal notation, e.g. `01:23:45:67:89:AB`.
/// The serialized representation uses the same notation.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Creates a Bluetooth address from its six octets, most significant first.
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// The all-zero address.
    ///
    /// It selects any local adapter when listening,
    /// but never identifies a remote peer.
    pub const fn any() -> Self {
        Self([0; 6])
    }

    /// Whether this is the [any](Self::any) address.
    pub fn is_any(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", octet)?;
        }
        Ok(())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<[u8; 6]> for Address {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<MacAddr6> for Address {
    fn from(addr: MacAddr6) -> Self {
        Self(addr.into_array())
    }
}

#[cfg(feature = "rfcomm")]
impl From<bluer::Address> for Address {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "rfcomm")]
impl From<Address> for bluer::Address {
    fn from(addr: Address) -> Self {
        bluer::Address::new(addr.0)
    }
}

/// Malformed Bluetooth address.
///
/// Contains the text that failed to parse.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InvalidAddress(pub String);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "invalid Bluetooth address: {}", &self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> std::result::Result<Self, InvalidAddress> {
        let invalid = || InvalidAddress(s.to_string());
        let mut addr = [0; 6];
        let mut fields = s.split(':');
        for octet in addr.iter_mut() {
            let field = fields.next().filter(|f| (1..=2).contains(&f.len())).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(field, 16).map_err(|_| invalid())?;
        }
        match fields.next() {
            Some(_) => Err(invalid()),
            None => Ok(Self(addr)),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = <std::borrow::Cow<str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
