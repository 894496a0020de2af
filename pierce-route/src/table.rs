//! CIDR-keyed route table backed by a `BTreeMap` keyed by each range's
//! minimum address: since every stored range is disjoint from every other
//! (the invariant `add` enforces), a lookup or overlap check only ever
//! needs to inspect the one neighboring entry on each side of the candidate
//! key, which a `BTreeMap` range query gives for free without hand-rolling
//! tree balancing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::cidr::Ipv4Cidr;
use crate::dialer::Dialer;
use crate::errors::{Error, Result};

struct Entry {
    max: u32,
    dialer: Arc<dyn Dialer>,
}

#[derive(Default)]
pub struct RouteTable {
    entries: RwLock<BTreeMap<u32, Entry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `cidr -> dialer`. Rejects any overlap with an existing range.
    pub fn add(&self, cidr: Ipv4Cidr, dialer: Arc<dyn Dialer>) -> Result<()> {
        let (min, max) = cidr.range();
        let mut entries = self.entries.write().expect("route table lock poisoned");

        if let Some((_, before)) = entries.range(..=max).next_back() {
            if before.max >= min {
                return Err(Error::Overlap);
            }
        }
        if let Some((&next_min, _)) = entries.range(min..).next() {
            if next_min <= max {
                return Err(Error::Overlap);
            }
        }

        entries.insert(min, Entry { max, dialer });
        Ok(())
    }

    /// Return the dialer whose `[min, max]` contains `ip`, if any.
    pub fn get(&self, ip: u32) -> Option<Arc<dyn Dialer>> {
        let entries = self.entries.read().expect("route table lock poisoned");
        let (_, entry) = entries.range(..=ip).next_back()?;
        if entry.max >= ip {
            Some(entry.dialer.clone())
        } else {
            None
        }
    }

    /// Remove the entry whose range starts at `cidr`'s minimum address.
    pub fn del(&self, cidr: Ipv4Cidr) {
        let (min, _) = cidr.range();
        self.entries
            .write()
            .expect("route table lock poisoned")
            .remove(&min);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("route table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::DirectDialer;

    fn dialer() -> Arc<dyn Dialer> {
        Arc::new(DirectDialer)
    }

    #[test]
    fn add_then_get_resolves_an_address_inside_the_range() {
        let table = RouteTable::new();
        let cidr: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        table.add(cidr, dialer()).unwrap();
        let ip = u32::from(std::net::Ipv4Addr::new(10, 0, 0, 42));
        assert!(table.get(ip).is_some());
    }

    #[test]
    fn get_outside_any_range_is_none() {
        let table = RouteTable::new();
        let cidr: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        table.add(cidr, dialer()).unwrap();
        let ip = u32::from(std::net::Ipv4Addr::new(10, 0, 1, 1));
        assert!(table.get(ip).is_none());
    }

    #[test]
    fn overlapping_add_is_rejected() {
        let table = RouteTable::new();
        table.add("10.0.0.0/24".parse().unwrap(), dialer()).unwrap();
        let overlapping: Ipv4Cidr = "10.0.0.128/25".parse().unwrap();
        assert!(matches!(table.add(overlapping, dialer()), Err(Error::Overlap)));
    }

    #[test]
    fn disjoint_adds_both_succeed() {
        let table = RouteTable::new();
        table.add("10.0.0.0/24".parse().unwrap(), dialer()).unwrap();
        table.add("10.0.1.0/24".parse().unwrap(), dialer()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn del_removes_a_route_and_get_falls_back_to_none() {
        let table = RouteTable::new();
        let cidr: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        table.add(cidr, dialer()).unwrap();
        table.del(cidr);
        let ip = u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1));
        assert!(table.get(ip).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn default_route_matches_any_address() {
        let table = RouteTable::new();
        table.add("0.0.0.0/0".parse().unwrap(), dialer()).unwrap();
        assert!(table.get(u32::from(std::net::Ipv4Addr::new(8, 8, 8, 8))).is_some());
        assert!(table.get(0).is_some());
        assert!(table.get(u32::MAX).is_some());
    }
}
