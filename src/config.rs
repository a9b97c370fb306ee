//! Connection manager configuration.

use crate::Security;

/// Connection manager configuration.
///
/// Use `..Default::default()` when constructing to leave unspecified
/// options at their defaults.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Listen for incoming connections on a secure link.
    pub listen_secure: bool,
    /// Listen for incoming connections on an insecure link.
    pub listen_insecure: bool,
    /// Size of the buffer used for reading from an established connection.
    ///
    /// Each [DataReceived](crate::ConnectionEvent::DataReceived) event
    /// carries at most this many bytes.
    pub read_buffer_size: usize,
    #[doc(hidden)]
    #[cfg_attr(feature = "serde", serde(skip))]
    pub _non_exhaustive: (),
}

impl Default for Config {
    fn default() -> Self {
        Self { listen_secure: true, listen_insecure: true, read_buffer_size: 1024, _non_exhaustive: () }
    }
}

impl Config {
    /// Whether a listener for the specified security kind should be running.
    pub(crate) fn listens(&self, security: Security) -> bool {
        match security {
            Security::Secure => self.listen_secure,
            Security::Insecure => self.listen_insecure,
        }
    }
}
