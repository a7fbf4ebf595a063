//! Address allocation for the failover topology
//!
//! Every host gets a fixed, well-known address inside a single private /24.
//! The offsets are part of the scenario: external programs are configured
//! with each other's addresses, so they must be stable between runs.

use crate::ValidationError;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Role slot within the address plan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Api,
    Directory,
    Publisher,
    Subscriber,
    /// Zero-based relay index
    Relay(usize),
}

impl Slot {
    /// Host offset inside the block
    pub fn offset(self) -> u32 {
        match self {
            Slot::Api => 1,
            Slot::Directory => 2,
            Slot::Publisher => 3,
            Slot::Subscriber => 4,
            Slot::Relay(i) => 5u32.saturating_add(i as u32),
        }
    }
}

/// Explicit address allocation policy handed to the topology builder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressPlan {
    block: Ipv4Network,
}

impl AddressPlan {
    pub const PREFIX: u8 = 24;

    /// Create a plan over a /24 network. The address must be the network
    /// address itself (e.g. `10.0.0.0/24`, not `10.0.0.7/24`).
    pub fn new(block: Ipv4Network) -> Result<Self, ValidationError> {
        if block.prefix() != Self::PREFIX {
            return Err(ValidationError::InvalidPlan(format!(
                "expected a /{} block, got {}",
                Self::PREFIX,
                block
            )));
        }
        if block.ip() != block.network() {
            return Err(ValidationError::InvalidPlan(format!(
                "{} is not aligned on its network address {}",
                block,
                block.network()
            )));
        }
        Ok(Self { block })
    }

    /// Plan over `<base>/24`
    pub fn from_base(base: Ipv4Addr) -> Result<Self, ValidationError> {
        let block = Ipv4Network::new(base, Self::PREFIX)
            .map_err(|e| ValidationError::InvalidPlan(e.to_string()))?;
        Self::new(block)
    }

    pub fn block(&self) -> Ipv4Network {
        self.block
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.block.contains(addr)
    }

    /// Address for a role slot
    pub fn address_of(&self, slot: Slot) -> Result<Ipv4Addr, ValidationError> {
        let offset = slot.offset();
        // .0 is the network address and .255 the broadcast address
        if offset == 0 || offset >= 255 {
            return Err(ValidationError::InvalidPlan(format!(
                "slot {:?} (offset {}) does not fit in {}",
                slot, offset, self.block
            )));
        }
        Ok(Ipv4Addr::from(u32::from(self.block.network()) + offset))
    }
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            block: Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), Self::PREFIX)
                .expect("10.0.0.0/24 is a valid network"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_addresses() {
        let plan = AddressPlan::default();
        assert_eq!(plan.address_of(Slot::Api).unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(plan.address_of(Slot::Directory).unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(plan.address_of(Slot::Publisher).unwrap(), Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(plan.address_of(Slot::Subscriber).unwrap(), Ipv4Addr::new(10, 0, 0, 4));
        assert_eq!(plan.address_of(Slot::Relay(0)).unwrap(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(plan.address_of(Slot::Relay(1)).unwrap(), Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn test_other_base() {
        let plan = AddressPlan::from_base(Ipv4Addr::new(192, 168, 77, 0)).unwrap();
        assert_eq!(
            plan.address_of(Slot::Relay(1)).unwrap(),
            Ipv4Addr::new(192, 168, 77, 6)
        );
        assert!(plan.contains(Ipv4Addr::new(192, 168, 77, 200)));
        assert!(!plan.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_invalid_plans() {
        assert!(AddressPlan::from_base(Ipv4Addr::new(10, 0, 0, 7)).is_err());
        let wide = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 16).unwrap();
        assert!(AddressPlan::new(wide).is_err());
    }

    #[test]
    fn test_relay_slots_exhaust_block() {
        let plan = AddressPlan::default();
        assert!(plan.address_of(Slot::Relay(249)).is_ok());
        assert!(plan.address_of(Slot::Relay(250)).is_err());
    }
}
