//! IPv4 CIDR parsing and the `[min, max]` integer range it covers.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidCidr(format!("{addr}/{prefix_len}")));
        }
        Ok(Self { addr, prefix_len })
    }

    /// The inclusive `[min, max]` u32 address range this CIDR covers.
    pub fn range(&self) -> (u32, u32) {
        let base = u32::from(self.addr);
        if self.prefix_len == 0 {
            return (0, u32::MAX);
        }
        let host_bits = 32 - u32::from(self.prefix_len);
        let mask = (!0u32) << host_bits;
        let min = base & mask;
        let max = min | !mask;
        (min, max)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidCidr(s.to_string()))?;
        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        let prefix_len: u8 = len_part
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        Ipv4Cidr::new(addr, prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_zero_covers_everything() {
        let cidr: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert_eq!(cidr.range(), (0, u32::MAX));
    }

    #[test]
    fn slash_32_is_a_single_address() {
        let cidr: Ipv4Cidr = "10.0.0.5/32".parse().unwrap();
        let (min, max) = cidr.range();
        assert_eq!(min, max);
        assert_eq!(min, u32::from(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn slash_24_covers_256_addresses() {
        let cidr: Ipv4Cidr = "192.168.1.0/24".parse().unwrap();
        let (min, max) = cidr.range();
        assert_eq!(max - min, 255);
        assert_eq!(min, u32::from(Ipv4Addr::new(192, 168, 1, 0)));
        assert_eq!(max, u32::from(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn malformed_cidr_is_rejected() {
        assert!("not-a-cidr".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
    }
}
