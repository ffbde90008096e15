//! Positional table mapping compact slots to member addresses.

use crate::error::RouteError;
use crate::frame::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub address: Address,
    pub connected: bool,
}

/// What an [`RouteTable::upsert`] did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New entry at the next free slot.
    Appended,
    /// The address already sat at the requested slot.
    Unchanged,
    /// The address moved from `from` and the previous occupant took its place.
    Swapped { from: usize },
    /// The previous occupant of the slot was dropped.
    Replaced { previous: Address },
    /// Append refused, the address is installed at `existing`.
    Duplicate { existing: usize },
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    capacity: usize,
}

impl RouteTable {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&RouteEntry> {
        self.entries.get(slot)
    }

    pub fn position_of(&self, address: &Address) -> Option<usize> {
        self.entries.iter().position(|entry| entry.address == *address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.position_of(address).is_some()
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &RouteEntry)> + '_ {
        self.entries.iter().enumerate()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.iter().map(|entry| entry.address)
    }

    /// Install `address` at `slot`.
    pub fn upsert(&mut self, address: Address, slot: usize) -> Result<Upsert, RouteError> {
        if slot >= self.capacity {
            return Err(RouteError::CapacityExceeded { slot, capacity: self.capacity });
        }
        let size = self.entries.len();
        if slot > size {
            return Err(RouteError::SlotGap { slot, size });
        }

        let existing = self.position_of(&address);
        let outcome = if slot == size {
            match existing {
                Some(existing) => {
                    log::warn!(
                        "route_table: {} already installed at slot {}, not appending at {}",
                        address,
                        existing,
                        slot
                    );
                    Upsert::Duplicate { existing }
                }
                None => {
                    self.entries.push(RouteEntry { address, connected: true });
                    Upsert::Appended
                }
            }
        } else {
            match existing {
                Some(from) if from == slot => Upsert::Unchanged,
                Some(from) => {
                    self.entries.swap(from, slot);
                    Upsert::Swapped { from }
                }
                None => {
                    let previous = self.entries[slot].address;
                    log::warn!(
                        "route_table: {} not installed, overwriting slot {} (was {})",
                        address,
                        slot,
                        previous
                    );
                    self.entries[slot] = RouteEntry { address, connected: true };
                    Upsert::Replaced { previous }
                }
            }
        };

        if log::log_enabled!(log::Level::Debug) {
            for (index, entry) in self.iter() {
                log::debug!("route_table: [{}] {} connected={}", index, entry.address, entry.connected);
            }
        }
        Ok(outcome)
    }
}
