//! Interface selection — finds the address the probe should target.
//!
//! The probed process listens on the instance's container interface,
//! not on loopback, so the first non-loopback IPv4 address wins.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use crate::error::ProbeError;

/// Enumerate host interfaces and return the first non-loopback IPv4 address.
pub fn select_address() -> Result<Ipv4Addr, ProbeError> {
    let interfaces =
        if_addrs::get_if_addrs().map_err(|e| ProbeError::NoInterfaces(e.to_string()))?;

    let selected = first_suitable(interfaces.iter().map(|intf| intf.ip()));
    match selected {
        Some(ip) => {
            debug!(%ip, "selected probe address");
            Ok(ip)
        }
        None => {
            debug!(count = interfaces.len(), "no non-loopback IPv4 interface");
            Err(ProbeError::NoSuitableInterface)
        }
    }
}

/// Pick the first non-loopback IPv4 address, in enumeration order.
pub fn first_suitable<I>(addrs: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    addrs.into_iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
        _ => None,
    })
}
