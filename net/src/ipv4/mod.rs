// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lenient parsing of IPv4 literals as they appear in cluster data.
//!
//! Cluster data is not consistent about how it writes a host address: the same tunnel address
//! may arrive as `10.0.80.0` or as `10.0.80.0/32`.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Errors which may occur while parsing an IPv4 literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIpv4Literal {
    /// The string is neither an IPv4 address nor an IPv4 CIDR.
    #[error("'{0}' is not an IPv4 address or CIDR")]
    Malformed(String),
}

/// Parse an IPv4 host address which may be written with a prefix length.
///
/// The prefix length (if any) is validated and then discarded.
///
/// # Errors
///
/// Returns [`InvalidIpv4Literal`] if the string is not an IPv4 address or IPv4 CIDR.
pub fn parse_host(literal: &str) -> Result<Ipv4Addr, InvalidIpv4Literal> {
    parse_cidr(literal).map(|net| net.addr())
}

/// Parse an IPv4 CIDR.  A bare address is taken as a `/32`.
///
/// Host bits are preserved (`172.0.0.1/26` stays `172.0.0.1/26`).
///
/// # Errors
///
/// Returns [`InvalidIpv4Literal`] if the string is not an IPv4 address or IPv4 CIDR.
pub fn parse_cidr(literal: &str) -> Result<Ipv4Net, InvalidIpv4Literal> {
    let malformed = || InvalidIpv4Literal::Malformed(literal.to_string());
    let trimmed = literal.trim();
    if trimmed.contains('/') {
        trimmed.parse::<Ipv4Net>().map_err(|_| malformed())
    } else {
        trimmed
            .parse::<Ipv4Addr>()
            .map(Ipv4Net::from)
            .map_err(|_| malformed())
    }
}
