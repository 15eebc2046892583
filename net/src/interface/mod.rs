// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Identifiers and states of the host's network interfaces.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::num::NonZero;
use std::str::FromStr;

/// The kernel's index of an interface (`ifindex`).
///
/// Only meaningful on the host that reported it, and only until the interface is deleted.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct InterfaceIndex(NonZero<u32>);

/// The kernel never hands out index zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceIndexError {
    /// Zero was supplied.
    #[error("interface index must not be zero")]
    Zero,
}

impl InterfaceIndex {
    /// Wrap a kernel supplied index.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceIndexError::Zero`] if `raw` is zero.
    pub fn try_new(raw: u32) -> Result<Self, InterfaceIndexError> {
        NonZero::new(raw)
            .map(InterfaceIndex)
            .ok_or(InterfaceIndexError::Zero)
    }

    /// The raw index.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl Debug for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "if#{}", self.0)
    }
}

impl Display for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for InterfaceIndex {
    type Error = InterfaceIndexError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        InterfaceIndex::try_new(value)
    }
}

impl From<InterfaceIndex> for u32 {
    fn from(value: InterfaceIndex) -> Self {
        value.to_u32()
    }
}

/// A name the kernel accepts for a network interface, such as `eth0` or `vxlan.calico`.
///
/// Names are 1 to 15 bytes of ASCII alphanumerics, `.`, `-` and `_`, and may not be `.` or
/// `..`.
#[repr(transparent)]
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

/// Reasons a string is not an [`InterfaceName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// The name is empty.
    #[error("interface name must not be empty")]
    Empty,
    /// The name is `.` or `..`.
    #[error("'{0}' is not a legal interface name")]
    MustNotIncludeOnlyDots(String),
    /// The name does not fit the kernel's buffer.
    #[error("interface name {0} is longer than {max} bytes", max = InterfaceName::MAX_LEN - 1)]
    TooLong(String),
    /// The name contains something other than ASCII alphanumerics, `.`, `-` or `_`.
    #[error("interface name {0} contains illegal characters")]
    IllegalCharacters(String),
}

impl InterfaceName {
    /// Size of the kernel's name buffer (`IFNAMSIZ`), including the trailing NUL.
    pub const MAX_LEN: usize = 16;

    fn is_legal_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
    }

    fn check(name: &str) -> Result<(), fn(String) -> IllegalInterfaceName> {
        if name.is_empty() {
            Err(|_| IllegalInterfaceName::Empty)
        } else if matches!(name, "." | "..") {
            Err(IllegalInterfaceName::MustNotIncludeOnlyDots)
        } else if !name.chars().all(Self::is_legal_char) {
            Err(IllegalInterfaceName::IllegalCharacters)
        } else if name.len() >= Self::MAX_LEN {
            Err(IllegalInterfaceName::TooLong)
        } else {
            Ok(())
        }
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match InterfaceName::check(&value) {
            Ok(()) => Ok(InterfaceName(value)),
            Err(reason) => Err(reason(value)),
        }
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        InterfaceName::try_from(value.to_string())
    }
}

impl FromStr for InterfaceName {
    type Err = IllegalInterfaceName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InterfaceName::try_from(s)
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for InterfaceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Whether an interface was administratively brought up.
#[derive(Copy, Clone, Debug, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Down (the kernel's default for new links).
    Down,
    /// Up.
    Up,
}

impl From<bool> for AdminState {
    fn from(up: bool) -> Self {
        if up { AdminState::Up } else { AdminState::Down }
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::interface::{AdminState, InterfaceIndex, InterfaceName};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for InterfaceIndex {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self(driver.produce()?))
        }
    }

    impl TypeGenerator for AdminState {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(AdminState::from(driver.produce::<bool>()?))
        }
    }

    impl TypeGenerator for InterfaceName {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789.-_";
            let len = 1 + usize::from(driver.produce::<u8>()?) % (InterfaceName::MAX_LEN - 2);
            let mut name: String = (0..len)
                .map(|_| {
                    let pick = usize::from(driver.produce::<u8>()?) % ALPHABET.len();
                    Some(char::from(ALPHABET[pick]))
                })
                .collect::<Option<_>>()?;
            if name.bytes().all(|b| b == b'.') {
                name.push('0');
            }
            InterfaceName::try_from(name).ok()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generated_names_are_legal() {
        bolero::check!()
            .with_type()
            .for_each(|name: &InterfaceName| {
                assert_eq!(name.as_ref().parse::<InterfaceName>().as_ref(), Ok(name));
            });
    }

    #[test]
    fn overlay_and_uplink_names() {
        for name in ["vxlan.calico", "eth0", "enp0s31f6", "bond0.100", "a23456789012345"] {
            assert_eq!(InterfaceName::try_from(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn illegal_names() {
        assert_eq!(InterfaceName::try_from(""), Err(IllegalInterfaceName::Empty));
        assert_eq!(
            InterfaceName::try_from("a234567890123456"),
            Err(IllegalInterfaceName::TooLong("a234567890123456".to_string()))
        );
        assert_eq!(
            InterfaceName::try_from("eth 0"),
            Err(IllegalInterfaceName::IllegalCharacters("eth 0".to_string()))
        );
        assert_eq!(
            InterfaceName::try_from(".."),
            Err(IllegalInterfaceName::MustNotIncludeOnlyDots("..".to_string()))
        );
    }

    #[test]
    fn zero_index_is_rejected() {
        assert_eq!(InterfaceIndex::try_new(0), Err(InterfaceIndexError::Zero));
        assert_eq!(InterfaceIndex::try_new(7).map(u32::from), Ok(7));
        assert_eq!(format!("{:?}", InterfaceIndex::try_new(7).unwrap()), "if#7");
    }

    #[test]
    fn admin_state_from_flag() {
        assert_eq!(AdminState::from(true), AdminState::Up);
        assert_eq!(AdminState::from(false), AdminState::Down);
    }
}
