//! Carveouts: named ranges reserved before the allocator goes live

use crate::{AllocError, AllocResult};

#[cfg(feature = "log")]
use log::{info, warn};

use super::{buddy_allocator::BuddyAllocator, pte::PteClass};

/// A named range withheld from general allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Carveout {
    pub name: &'static str,
    pub base: u64,
    pub length: u64,
}

impl Carveout {
    pub const fn new(name: &'static str, base: u64, length: u64) -> Self {
        Self { name, base, length }
    }

    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    pub const fn overlaps(&self, other: &Carveout) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

impl BuddyAllocator {
    /// Reserve `carveout` as a fixed allocation
    ///
    /// Only allowed before the first allocation has been made.
    pub fn reserve_carveout(&mut self, carveout: &Carveout) -> AllocResult {
        if !self.is_initialized() {
            return Err(AllocError::NoMemory);
        }
        if self.alloc_made {
            warn!(
                "buddy allocator: carveout {} after the first allocation",
                carveout.name
            );
            return Err(AllocError::AllocationMade);
        }
        if let Some(_other) = self.carveouts.iter().find(|co| co.overlaps(carveout)) {
            warn!(
                "buddy allocator: carveout {} overlaps {}",
                carveout.name, _other.name
            );
            return Err(AllocError::MemoryOverlap);
        }

        self.alloc_fixed_pte(carveout.base, carveout.length, PteClass::Any)?;
        self.carveouts.push(*carveout);
        info!(
            "buddy allocator: carveout {} [{:#x}, {:#x})",
            carveout.name,
            carveout.base,
            carveout.end()
        );
        Ok(())
    }

    /// Return a carveout to the allocator
    pub fn release_carveout(&mut self, carveout: &Carveout) -> AllocResult {
        let Some(pos) = self.carveouts.iter().position(|co| co == carveout) else {
            warn!("buddy allocator: unknown carveout {}", carveout.name);
            return Err(AllocError::NotAllocated);
        };
        self.carveouts.remove(pos);
        self.do_free_fixed(carveout.base)?;
        info!("buddy allocator: released carveout {}", carveout.name);
        Ok(())
    }

    /// Carveouts currently reserved
    pub fn carveouts(&self) -> &[Carveout] {
        &self.carveouts
    }
}
