//! IP ranges attached to policies.
//!
//! A policy with a non-empty `ip_access` list only takes effect when the
//! request origin matches one of its ranges. Ranges are written as an exact
//! address (`10.0.0.5`), a CIDR block (`10.0.0.0/24`), or an inclusive
//! span (`10.0.0.1-10.0.0.50`).

use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One entry of a policy's `ip_access` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpRange {
    /// Exact address.
    Exact(IpAddr),
    /// CIDR block.
    Cidr {
        /// Network address.
        addr: IpAddr,
        /// Prefix length in bits.
        prefix: u8,
    },
    /// Inclusive span between two addresses of the same family.
    Span {
        /// Lower bound.
        start: IpAddr,
        /// Upper bound.
        end: IpAddr,
    },
}

/// Error returned for an unparsable range string.
#[derive(Debug, thiserror::Error)]
#[error("invalid ip range: {0}")]
pub struct InvalidIpRange(pub String);

impl IpRange {
    /// Check whether the given address falls inside this range.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            IpRange::Exact(addr) => *addr == ip,
            IpRange::Cidr { addr, prefix } => match (addr, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    prefix_match(&net.octets(), &ip.octets(), *prefix)
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    prefix_match(&net.octets(), &ip.octets(), *prefix)
                }
                _ => false,
            },
            IpRange::Span { start, end } => match (start, end, ip) {
                (IpAddr::V4(start), IpAddr::V4(end), IpAddr::V4(ip)) => {
                    (start.octets()..=end.octets()).contains(&ip.octets())
                }
                (IpAddr::V6(start), IpAddr::V6(end), IpAddr::V6(ip)) => {
                    (start.octets()..=end.octets()).contains(&ip.octets())
                }
                _ => false,
            },
        }
    }
}

fn prefix_match(net: &[u8], ip: &[u8], prefix: u8) -> bool {
    let bits = usize::from(prefix).min(net.len() * 8);
    let full_bytes = bits / 8;
    let rest = bits % 8;

    if net[..full_bytes] != ip[..full_bytes] {
        return false;
    }
    if rest == 0 {
        return true;
    }
    let mask = !(0xffu8 >> rest);
    (net[full_bytes] & mask) == (ip[full_bytes] & mask)
}

impl FromStr for IpRange {
    type Err = InvalidIpRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((addr, prefix)) = s.split_once('/') {
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| InvalidIpRange(s.to_owned()))?;
            let prefix: u8 = prefix.parse().map_err(|_| InvalidIpRange(s.to_owned()))?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(InvalidIpRange(s.to_owned()));
            }
            return Ok(IpRange::Cidr { addr, prefix });
        }
        if let Some((start, end)) = s.split_once('-') {
            let start: IpAddr = start
                .trim()
                .parse()
                .map_err(|_| InvalidIpRange(s.to_owned()))?;
            let end: IpAddr = end
                .trim()
                .parse()
                .map_err(|_| InvalidIpRange(s.to_owned()))?;
            if start.is_ipv4() != end.is_ipv4() {
                return Err(InvalidIpRange(s.to_owned()));
            }
            return Ok(IpRange::Span { start, end });
        }
        let addr: IpAddr = s.parse().map_err(|_| InvalidIpRange(s.to_owned()))?;
        Ok(IpRange::Exact(addr))
    }
}
