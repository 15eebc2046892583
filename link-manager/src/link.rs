// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::LinkError;
use derive_builder::Builder;
use net::eth::mac::Mac;
use net::interface::{AdminState, InterfaceIndex, InterfaceName};
use net::vxlan::Vni;
use rtnetlink::packet_route::link::{
    InfoData, InfoKind, InfoVxlan, LinkAttribute, LinkFlags, LinkInfo, LinkMessage,
};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// An observed network link.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Link {
    /// The kernel index of the link.
    pub index: InterfaceIndex,
    /// The name of the link.
    pub name: InterfaceName,
    /// The link layer address (absent or non-ethernet addresses are reported as `None`).
    pub mac: Option<Mac>,
    /// The MTU of the link.
    pub mtu: Option<u32>,
    /// The administrative state of the link.
    pub admin_state: AdminState,
    /// Type specific attributes.
    pub kind: LinkKind,
}

/// The type of a [`Link`], as far as we care.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum LinkKind {
    /// A vxlan device
    Vxlan(VxlanAttrs),
    /// Anything else
    Other,
}

/// The observed attributes of a vxlan device.
///
/// Every attribute is optional since the kernel is not obliged to report them.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct VxlanAttrs {
    /// The vni of the device.
    pub vni: Option<Vni>,
    /// The UDP destination port of the device.
    pub port: Option<u16>,
    /// The local (source) address used for encapsulated packets.
    pub local: Option<Ipv4Addr>,
}

impl Link {
    /// Tell if the link is a vxlan device
    #[must_use]
    pub fn is_vxlan(&self) -> bool {
        matches!(self.kind, LinkKind::Vxlan(_))
    }

    /// Tell if the link is administratively up
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.admin_state == AdminState::Up
    }
}

impl VxlanAttrs {
    fn from_info_data(data: &[InfoVxlan]) -> Self {
        data.iter().fold(VxlanAttrs::default(), |mut attrs, info| {
            match info {
                InfoVxlan::Id(id) => attrs.vni = Vni::new_checked(*id).ok(),
                InfoVxlan::Port(port) => attrs.port = Some(*port),
                InfoVxlan::Local(local) => attrs.local = Some(*local),
                _ => {}
            }
            attrs
        })
    }
}

impl TryFrom<&LinkMessage> for Link {
    type Error = LinkError;

    fn try_from(message: &LinkMessage) -> Result<Self, Self::Error> {
        let index = InterfaceIndex::try_new(message.header.index)
            .map_err(|e| LinkError::Malformed(e.to_string()))?;
        let admin_state = AdminState::from(message.header.flags.contains(LinkFlags::Up));
        let mut name = None;
        let mut mac = None;
        let mut mtu = None;
        let mut is_vxlan = false;
        let mut vxlan = VxlanAttrs::default();
        for attr in &message.attributes {
            match attr {
                LinkAttribute::IfName(raw) => {
                    name = Some(
                        InterfaceName::try_from(raw.as_str())
                            .map_err(|e| LinkError::Malformed(e.to_string()))?,
                    );
                }
                LinkAttribute::Address(raw) => mac = Mac::try_from(raw.as_slice()).ok(),
                LinkAttribute::Mtu(raw) => mtu = Some(*raw),
                LinkAttribute::LinkInfo(infos) => {
                    for info in infos {
                        match info {
                            LinkInfo::Kind(InfoKind::Vxlan) => is_vxlan = true,
                            LinkInfo::Data(InfoData::Vxlan(data)) => {
                                vxlan = VxlanAttrs::from_info_data(data);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        let name = name.ok_or_else(|| {
            LinkError::Malformed(format!("link with index {index} reports no name"))
        })?;
        Ok(Link {
            index,
            name,
            mac,
            mtu,
            admin_state,
            kind: if is_vxlan {
                LinkKind::Vxlan(vxlan)
            } else {
                LinkKind::Other
            },
        })
    }
}

/// The intended properties of the overlay's vxlan device.
#[derive(Builder, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
pub struct VxlanLinkSpec {
    /// The name of the device.
    pub name: InterfaceName,
    /// The vni to be used for this device.
    pub vni: Vni,
    /// The UDP destination port of the device.
    pub port: u16,
    /// The local (underlay) IPv4 address used as source of encapsulated packets.
    pub local: Ipv4Addr,
    /// The MAC address of the device.
    pub mac: Mac,
}

/// A spec matches an observed link when the link is a vxlan device and every attribute we care
/// about is reported and equal.  MTU, addresses and admin state are adjusted in place and are
/// therefore not part of the comparison.
impl PartialEq<Link> for VxlanLinkSpec {
    fn eq(&self, other: &Link) -> bool {
        let LinkKind::Vxlan(attrs) = &other.kind else {
            return false;
        };
        self.name == other.name
            && other.mac == Some(self.mac)
            && attrs.vni == Some(self.vni)
            && attrs.port == Some(self.port)
            && attrs.local == Some(self.local)
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::{Link, LinkKind, VxlanAttrs};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for VxlanAttrs {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(VxlanAttrs {
                vni: driver.produce()?,
                port: driver.produce()?,
                local: driver.produce()?,
            })
        }
    }

    impl TypeGenerator for LinkKind {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            if driver.produce::<u8>()? % 4 == 0 {
                Some(LinkKind::Other)
            } else {
                Some(LinkKind::Vxlan(driver.produce()?))
            }
        }
    }

    impl TypeGenerator for Link {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Link {
                index: driver.produce()?,
                name: driver.produce()?,
                mac: driver.produce()?,
                mtu: driver.produce()?,
                admin_state: driver.produce()?,
                kind: driver.produce()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vxlan_message(index: u32, spec: &VxlanLinkSpec) -> LinkMessage {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.header.flags = LinkFlags::Up;
        message.attributes = vec![
            LinkAttribute::IfName(spec.name.to_string()),
            LinkAttribute::Address(spec.mac.0.to_vec()),
            LinkAttribute::Mtu(1410),
            LinkAttribute::LinkInfo(vec![
                LinkInfo::Kind(InfoKind::Vxlan),
                LinkInfo::Data(InfoData::Vxlan(vec![
                    InfoVxlan::Id(spec.vni.as_u32()),
                    InfoVxlan::Port(spec.port),
                    InfoVxlan::Local(spec.local),
                    InfoVxlan::Ttl(64),
                ])),
            ]),
        ];
        message
    }

    #[test]
    fn spec_matches_its_own_observation() {
        bolero::check!()
            .with_type()
            .for_each(|spec: &VxlanLinkSpec| {
                let link = Link::try_from(&vxlan_message(7, spec)).unwrap();
                assert_eq!(link.index.to_u32(), 7);
                assert_eq!(link.mtu, Some(1410));
                assert!(link.is_up());
                assert!(spec == &link);
            });
    }

    #[test]
    fn equality_meaning() {
        bolero::check!()
            .with_type()
            .for_each(|(spec, link): &(VxlanLinkSpec, Link)| {
                if spec == link {
                    let LinkKind::Vxlan(attrs) = &link.kind else {
                        panic!("only vxlan links may match");
                    };
                    assert_eq!(attrs.vni, Some(spec.vni));
                    assert_eq!(attrs.local, Some(spec.local));
                    assert_eq!(link.mac, Some(spec.mac));
                }
            });
    }

    #[test]
    fn any_attribute_change_is_a_mismatch() {
        let spec = VxlanLinkSpecBuilder::default()
            .name("vxlan.calico".try_into().unwrap())
            .vni(Vni::new_checked(4096).unwrap())
            .port(4789)
            .local(Ipv4Addr::new(172, 0, 0, 2))
            .mac(Mac([0x00, 0x0a, 0x74, 0x9d, 0x68, 0x16]))
            .build()
            .unwrap();
        let observed = Link::try_from(&vxlan_message(3, &spec)).unwrap();
        assert!(spec == observed);

        let mut other = spec.clone();
        other.port = 8472;
        assert!(other != observed);
        let mut other = spec.clone();
        other.local = Ipv4Addr::new(172, 0, 0, 3);
        assert!(other != observed);
        let mut other = spec.clone();
        other.vni = Vni::new_checked(1).unwrap();
        assert!(other != observed);
        let mut other = spec.clone();
        other.mac = Mac([0x00, 0x0a, 0x74, 0x9d, 0x68, 0x17]);
        assert!(other != observed);
    }

    #[test]
    fn plain_links_are_parsed() {
        let mut message = LinkMessage::default();
        message.header.index = 2;
        message.attributes = vec![
            LinkAttribute::IfName("eth0".to_string()),
            LinkAttribute::Address(vec![0x52, 0x54, 0, 0x12, 0x34, 0x56]),
        ];
        let link = Link::try_from(&message).unwrap();
        assert_eq!(link.name.as_ref(), "eth0");
        assert_eq!(link.kind, LinkKind::Other);
        assert_eq!(link.admin_state, AdminState::Down);
        assert_eq!(link.mac, Some(Mac([0x52, 0x54, 0, 0x12, 0x34, 0x56])));
    }

    #[test]
    fn nameless_or_zero_index_links_are_malformed() {
        let mut message = LinkMessage::default();
        message.header.index = 2;
        assert!(matches!(
            Link::try_from(&message),
            Err(LinkError::Malformed(_))
        ));
        message.header.index = 0;
        message.attributes = vec![LinkAttribute::IfName("eth0".to_string())];
        assert!(matches!(
            Link::try_from(&message),
            Err(LinkError::Malformed(_))
        ));
    }
}
