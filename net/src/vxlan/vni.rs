// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::fmt::{Display, Formatter};
use std::num::NonZero;
use std::str::FromStr;

/// The identifier of the overlay segment a vxlan device belongs to ([RFC7348]).
///
/// Every node of the overlay must use the same `Vni`.  Zero is reserved and values above
/// [`Vni::MAX`] do not fit the 24 bit header field, so neither can be represented.
///
/// [RFC7348]: https://datatracker.ietf.org/doc/html/rfc7348#section-5
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Deserialize, serde::Serialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(transparent)]
pub struct Vni(NonZero<u32>);

impl Vni {
    /// Smallest legal value.
    pub const MIN: u32 = 1;
    /// Largest legal value (2<sup>24</sup> - 1).
    pub const MAX: u32 = 0x00_FF_FF_FF;
    /// The segment used by overlay nodes unless configured otherwise.
    pub const DEFAULT: Vni = Vni(NonZero::<u32>::MIN.saturating_add(4095));

    /// Validate a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidVni`] if `vni` is zero or larger than [`Vni::MAX`].
    pub fn new_checked(vni: u32) -> Result<Vni, InvalidVni> {
        let Some(nonzero) = NonZero::new(vni) else {
            return Err(InvalidVni::ReservedZero);
        };
        if vni > Vni::MAX {
            return Err(InvalidVni::TooLarge(vni));
        }
        Ok(Vni(nonzero))
    }

    /// The raw identifier.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl Default for Vni {
    fn default() -> Self {
        Vni::DEFAULT
    }
}

impl Display for Vni {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.as_u32(), f)
    }
}

/// Reasons a value is not a legal [`Vni`].
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidVni {
    /// Zero is reserved.
    #[error("vni 0 is reserved")]
    ReservedZero,
    /// The value does not fit in 24 bits.
    #[error("vni {0} does not fit in 24 bits (max {max})", max = Vni::MAX)]
    TooLarge(u32),
    /// The text is not a decimal number.
    #[error("'{0}' is not a vni")]
    NotANumber(String),
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.as_u32()
    }
}

impl TryFrom<u32> for Vni {
    type Error = InvalidVni;

    fn try_from(vni: u32) -> Result<Vni, Self::Error> {
        Vni::new_checked(vni)
    }
}

impl FromStr for Vni {
    type Err = InvalidVni;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<u32>()
            .map_err(|_| InvalidVni::NotANumber(s.to_string()))?;
        Vni::new_checked(raw)
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::Vni;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for Vni {
        fn generate<D: Driver>(d: &mut D) -> Option<Self> {
            let raw = d.produce::<u32>()? % Vni::MAX + Vni::MIN;
            Vni::new_checked(raw).ok()
        }
    }
}
