use std::{fmt::Display, io::Write};

use thiserror::Error;
use tracing::{debug, trace};

use crate::endpoint::{write_block, Delivery};

/// Identifies a client by the slot it occupies and how often that slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    slot: usize,
    generation: u32,
}

impl ClientId {
    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// The slot index.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// How many times the slot was vacated before this client took it.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Why a client was not admitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is taken.
    #[error("All {capacity} client slots are in use")]
    CapacityExceeded {
        /// The configured ceiling.
        capacity: usize,
    },
}

/// A client handle the registry refused, handed back so the caller can close it.
#[derive(Debug)]
pub struct Rejected<C> {
    /// The refused handle.
    pub handle: C,

    /// The reason.
    pub reason: RegistryError,
}

/// Tally of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients which took the whole block.
    pub delivered: usize,

    /// Clients which took part or none of the block, because they were not keeping up.
    pub short: usize,

    /// Clients whose send failed. They have been dropped from the registry.
    pub failed: usize,
}

#[derive(Debug)]
struct Slot<C> {
    generation: u32,
    client: Option<C>,
}

/// The set of connected clients, bounded by a fixed capacity.
///
/// Slots are allocated up front and scanned linearly; the first vacant slot wins.
/// That is fine for the tens of clients this is meant for.
#[derive(Debug)]
pub struct ClientRegistry<C> {
    slots: Vec<Slot<C>>,
    active: usize,

    // Clients whose send failed during a broadcast, waiting to be closed.
    graveyard: Vec<(ClientId, C)>,
}

impl<C> ClientRegistry<C> {
    /// An empty registry with room for `capacity` clients.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                client: None,
            })
            .collect();

        Self {
            slots,
            active: 0,
            graveyard: vec![],
        }
    }

    /// The most clients which may be active at once.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How many clients are active.
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// True if the next [`ClientRegistry::add`] would be rejected.
    pub fn is_full(&self) -> bool {
        self.active == self.capacity()
    }

    /// Admit a client into the first vacant slot.
    pub fn add(&mut self, handle: C) -> Result<ClientId, Rejected<C>> {
        if self.is_full() {
            return Err(Rejected {
                handle,
                reason: RegistryError::CapacityExceeded {
                    capacity: self.capacity(),
                },
            });
        }

        let (slot, entry) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| entry.client.is_none())
            .expect("A registry which is not full has a vacant slot");

        entry.client = Some(handle);
        self.active += 1;

        Ok(ClientId::new(slot, entry.generation))
    }

    /// Take a client out of the registry.
    ///
    /// Gives `None` if the client is not (or no longer) present.
    pub fn remove(&mut self, id: ClientId) -> Option<C> {
        let entry = self.slots.get_mut(id.slot)?;
        if entry.generation != id.generation {
            return None;
        }

        let client = entry.client.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.active -= 1;

        Some(client)
    }

    /// Borrow an active client.
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut C> {
        self.slots
            .get_mut(id.slot)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.client.as_mut())
    }

    /// Ids of all active clients, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.client.is_some())
            .map(|(slot, entry)| ClientId::new(slot, entry.generation))
    }

    /// Hand over clients which failed during broadcasts, so they can be closed.
    pub fn reap(&mut self) -> Vec<(ClientId, C)> {
        std::mem::take(&mut self.graveyard)
    }
}

impl<C: Write> ClientRegistry<C> {
    /// Offer a block to every active client, without blocking.
    ///
    /// A client which is not keeping up loses (part of) the block; nothing is queued for it.
    /// A client whose send fails is removed right away and parked until [`ClientRegistry::reap`].
    pub fn broadcast(&mut self, bytes: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(client) = entry.client.as_mut() else {
                continue;
            };

            match write_block(client, bytes) {
                Ok(Delivery::Complete) => report.delivered += 1,
                Ok(Delivery::Short { written }) => {
                    trace!(slot, written, dropped = bytes.len() - written, "Client not keeping up");
                    report.short += 1;
                }
                Err(e) => {
                    debug!(slot, %e, "Send to client failed");
                    report.failed += 1;

                    let id = ClientId::new(slot, entry.generation);
                    if let Some(client) = entry.client.take() {
                        entry.generation = entry.generation.wrapping_add(1);
                        self.active -= 1;
                        self.graveyard.push((id, client));
                    }
                }
            }
        }

        report
    }
}
