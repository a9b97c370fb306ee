//! Remote peer identity.

use std::{fmt, str::FromStr};

use crate::{Address, InvalidAddress};

/// Identity of a remote peer.
///
/// The address identifies the endpoint on the transport, while the name is
/// a human readable label that may or may not be known.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peer {
    /// Device address.
    pub address: Address,
    /// Human readable device name, if known.
    pub name: Option<String>,
}

impl Peer {
    /// Creates a peer with the specified address and unknown name.
    pub const fn new(address: Address) -> Self {
        Self { address, name: None }
    }

    /// Sets the human readable name of the peer.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The peer name, or its address when the name is unknown.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.address.to_string(),
        }
    }

    /// Whether a connection can be attempted to this peer.
    pub(crate) fn is_connectable(&self) -> bool {
        !self.address.is_any()
    }
}

impl From<Address> for Peer {
    fn from(address: Address) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, &self.address),
            None => write!(f, "{}", &self.address),
        }
    }
}

/// Parses the address of a peer with unknown name.
impl FromStr for Peer {
    type Err = InvalidAddress;
    fn from_str(s: &str) -> Result<Self, InvalidAddress> {
        Ok(Self::new(s.parse()?))
    }
}
