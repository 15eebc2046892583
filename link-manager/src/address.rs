// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::LinkError;
use ipnet::IpNet;
use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage};
use serde::{Deserialize, Serialize};

/// IP address family selector for address listings.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum IpFamily {
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
}

impl IpFamily {
    /// Tell if `net` belongs to this family
    #[must_use]
    pub fn contains(self, net: &IpNet) -> bool {
        matches!(
            (self, net),
            (IpFamily::V4, IpNet::V4(_)) | (IpFamily::V6, IpNet::V6(_))
        )
    }
}

/// Extract the interface address (with its prefix length) from an [`AddressMessage`].
///
/// For point to point links the kernel reports the peer as `IFA_ADDRESS` and the local address
/// as `IFA_LOCAL`; we always want the local one.
pub(crate) fn interface_address(message: &AddressMessage) -> Result<IpNet, LinkError> {
    let local = message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Local(ip) => Some(*ip),
        _ => None,
    });
    let address = message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(ip) => Some(*ip),
        _ => None,
    });
    let ip = local.or(address).ok_or_else(|| {
        LinkError::Malformed(format!(
            "address message for link {} carries no address",
            message.header.index
        ))
    })?;
    IpNet::new(ip, message.header.prefix_len).map_err(|e| LinkError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn local_address_wins() {
        let mut message = AddressMessage::default();
        message.header.index = 2;
        message.header.prefix_len = 16;
        message.attributes = vec![
            AddressAttribute::Address(IpAddr::V4(Ipv4Addr::new(172, 0, 0, 1))),
            AddressAttribute::Local(IpAddr::V4(Ipv4Addr::new(172, 0, 0, 2))),
        ];
        assert_eq!(
            interface_address(&message).unwrap(),
            "172.0.0.2/16".parse::<IpNet>().unwrap()
        );
    }

    #[test]
    fn missing_or_bogus_address_is_malformed() {
        let mut message = AddressMessage::default();
        message.header.prefix_len = 24;
        assert!(matches!(
            interface_address(&message),
            Err(LinkError::Malformed(_))
        ));
        message.header.prefix_len = 64;
        message.attributes = vec![AddressAttribute::Address(IpAddr::V4(Ipv4Addr::LOCALHOST))];
        assert!(matches!(
            interface_address(&message),
            Err(LinkError::Malformed(_))
        ));
    }

    #[test]
    fn family_filter() {
        let v4: IpNet = "10.0.0.0/32".parse().unwrap();
        let v6: IpNet = "fd00::1/128".parse().unwrap();
        assert!(IpFamily::V4.contains(&v4));
        assert!(!IpFamily::V4.contains(&v6));
        assert!(IpFamily::V6.contains(&v6));
    }
}
