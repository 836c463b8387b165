//! IPv4 address blocks for link segments.

use std::fmt;
use std::net::Ipv4Addr;

use crate::config::ConfigError;

/// The default first block, matching the usual `10.1.1.0/24` starting point.
pub const DEFAULT_ADDRESS_BASE: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 0);

const PREFIX_LEN: u8 = 24;
const BLOCK_SIZE: u32 = 1 << (32 - PREFIX_LEN);

/// A `/24` network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct Subnet {
    network: Ipv4Addr,
}

impl Subnet {
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        PREFIX_LEN
    }

    /// Host `n` within the block.
    pub fn host(&self, n: u8) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | n as u32)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & !(BLOCK_SIZE - 1) == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        // Equal-sized aligned blocks overlap only if they are the same block
        self.network == other.network
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, PREFIX_LEN)
    }
}

/// Hands out consecutive `/24` blocks. When the third octet overflows, allocation carries into
/// the second; the first octet never changes.
#[derive(Debug)]
pub(crate) struct AddressAllocator {
    next: u32,
    first_octet: u32,
}

impl AddressAllocator {
    pub(crate) fn new(base: Ipv4Addr) -> Result<Self, ConfigError> {
        let base = u32::from(base);
        // CORRECTNESS: The base must be the first address of a block.
        if base & (BLOCK_SIZE - 1) != 0 {
            return Err(ConfigError::UnalignedAddressBase(Ipv4Addr::from(base)));
        }
        Ok(Self {
            next: base,
            first_octet: base >> 24,
        })
    }

    pub(crate) fn allocate(&mut self) -> Result<Subnet, ConfigError> {
        if self.next >> 24 != self.first_octet {
            return Err(ConfigError::AddressSpaceExhausted);
        }
        let subnet = Subnet {
            network: Ipv4Addr::from(self.next),
        };
        self.next = self.next.wrapping_add(BLOCK_SIZE);
        Ok(subnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_consecutive() -> anyhow::Result<()> {
        let mut alloc = AddressAllocator::new(DEFAULT_ADDRESS_BASE)?;
        let a = alloc.allocate()?;
        let b = alloc.allocate()?;
        assert_eq!(a.to_string(), "10.1.1.0/24");
        assert_eq!(b.to_string(), "10.1.2.0/24");
        assert_eq!(a.host(1), Ipv4Addr::new(10, 1, 1, 1));
        assert!(a.contains(Ipv4Addr::new(10, 1, 1, 200)));
        assert!(!a.contains(b.host(1)));
        assert!(!a.overlaps(&b));
        Ok(())
    }

    #[test]
    fn third_octet_carries() -> anyhow::Result<()> {
        let mut alloc = AddressAllocator::new(Ipv4Addr::new(10, 1, 255, 0))?;
        assert_eq!(alloc.allocate()?.network(), Ipv4Addr::new(10, 1, 255, 0));
        assert_eq!(alloc.allocate()?.network(), Ipv4Addr::new(10, 2, 0, 0));
        Ok(())
    }

    #[test]
    fn exhaustion_fails() -> anyhow::Result<()> {
        let mut alloc = AddressAllocator::new(Ipv4Addr::new(10, 255, 255, 0))?;
        alloc.allocate()?;
        assert!(matches!(
            alloc.allocate(),
            Err(ConfigError::AddressSpaceExhausted)
        ));
        Ok(())
    }

    #[test]
    fn unaligned_base_fails() {
        assert!(matches!(
            AddressAllocator::new(Ipv4Addr::new(10, 1, 1, 7)),
            Err(ConfigError::UnalignedAddressBase(..))
        ));
    }
}
