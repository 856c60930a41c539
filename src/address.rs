//! Conversion between textual and binary, family-tagged addresses.

use socket2::Domain;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("{len} bytes is not a valid {family:?} address")]
    InvalidLength { family: Family, len: usize },

    #[error("address family must be specified")]
    UnspecifiedFamily,
}

/// Address family, as understood by the socket layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Family {
    Unspec,
    Inet,
    Inet6,
}

impl Family {
    /// The platform `AF_*` value for this family.
    pub fn as_raw(&self) -> i32 {
        match self {
            Family::Unspec => 0,
            Family::Inet => i32::from(Domain::IPV4),
            Family::Inet6 => i32::from(Domain::IPV6),
        }
    }

    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Family::Inet,
            IpAddr::V6(_) => Family::Inet6,
        }
    }
}

impl TryFrom<i32> for Family {
    type Error = i32;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        [Family::Unspec, Family::Inet, Family::Inet6]
            .into_iter()
            .find(|family| family.as_raw() == raw)
            .ok_or(raw)
    }
}

/// Parses `text` as IPv4, then as IPv6.
pub fn parse_ip(text: &str) -> Result<IpAddr, Error> {
    if let Ok(v4) = text.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    if let Ok(v6) = text.parse::<Ipv6Addr>() {
        return Ok(IpAddr::V6(v6));
    }
    Err(Error::InvalidAddress(text.to_string()))
}

/// Renders an address in its canonical textual form.
pub fn ip_to_text(address: &IpAddr) -> String {
    address.to_string()
}

/// Converts textual address to its family and network-order bytes.
pub fn text_to_address(text: &str) -> Result<(Family, Vec<u8>), Error> {
    let address = parse_ip(text)?;
    let octets = match address {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    Ok((Family::of(&address), octets))
}

/// Inverse of [text_to_address].
pub fn address_to_text(family: Family, octets: &[u8]) -> Result<String, Error> {
    let invalid_length = || Error::InvalidLength {
        family,
        len: octets.len(),
    };
    let address = match family {
        Family::Unspec => return Err(Error::UnspecifiedFamily),
        Family::Inet => {
            let octets: [u8; 4] = octets.try_into().map_err(|_| invalid_length())?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        Family::Inet6 => {
            let octets: [u8; 16] = octets.try_into().map_err(|_| invalid_length())?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };
    Ok(ip_to_text(&address))
}
