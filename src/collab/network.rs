use anyhow::{Result, anyhow};
use get_if_addrs::{IfAddr, get_if_addrs};
use std::net::{IpAddr, SocketAddr};

/// Checks if an IP address is acceptable (IPv6 ULA or IPv4 private).
fn is_acceptable_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V6(ipv6) => ipv6.is_unique_local(),
        IpAddr::V4(ipv4) => ipv4.is_private(),
    }
}

/// Gets the first private network address (prioritizing IPv4 private over IPv6 ULA).
///
/// Returns `None` if no private addresses are found or if retrieving interfaces fails.
fn get_first_network_address(port: u16) -> Option<SocketAddr> {
    let mut if_addrs = get_if_addrs().ok()?;

    // Peers build `http://{address}/rpc`, which needs brackets for IPv6
    if_addrs.sort_by_key(|interface| match interface.addr {
        IfAddr::V4(_) => 0,
        IfAddr::V6(_) => 1,
    });

    for interface in if_addrs {
        let ip_addr = match interface.addr {
            IfAddr::V6(addr) => IpAddr::V6(addr.ip),
            IfAddr::V4(addr) => IpAddr::V4(addr.ip),
        };

        if is_acceptable_address(&ip_addr) {
            return Some(SocketAddr::new(ip_addr, port));
        }
    }

    None
}

/// The `ip:port` this node registers under.
///
/// An explicitly configured `ip` wins; otherwise the first private interface address is used.
pub fn advertised_address(ip: &str, port: u16) -> Result<SocketAddr> {
    if !ip.trim().is_empty() {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid IP '{ip}': {e}"))?;
        return Ok(SocketAddr::new(ip, port));
    }

    get_first_network_address(port).ok_or_else(|| anyhow!("no private network address found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore]
    fn test_get_first_network_address() {
        let result = get_first_network_address(8100);
        println!("First network address: {:?}", result);
    }

    #[test]
    fn test_acceptable_addresses() {
        use std::net::{Ipv4Addr, Ipv6Addr};

        let fd12_ip: Ipv6Addr = "fd12:cd60:9071:1:1000:2d:8558:2c5f".parse().unwrap();
        let fe80_ip: Ipv6Addr = "fe80::a0aa:85ff:fe58:2c5f".parse().unwrap();

        assert!(
            is_acceptable_address(&IpAddr::V6(fd12_ip)),
            "fd12... (ULA) should be acceptable"
        );
        assert!(
            !is_acceptable_address(&IpAddr::V6(fe80_ip)),
            "fe80... (link-local) should not be acceptable"
        );
        assert!(is_acceptable_address(&IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(!is_acceptable_address(&IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn test_configured_ip_wins() {
        let address = advertised_address("127.0.0.1", 8100).unwrap();
        assert_eq!(address.to_string(), "127.0.0.1:8100");

        assert!(advertised_address("not-an-ip", 8100).is_err());
    }
}
