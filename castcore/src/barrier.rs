use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::ObjectRef;

pub const DEFAULT_CARD_SIZE: usize = 512;

/// GC bookkeeping for reference stores. Called exactly once per accepted non-null store, after
/// the value has been validated and written.
pub trait WriteBarrier: Send + Sync {
    fn record_reference_store(&self, slot: usize, value: &ObjectRef);
}

impl<B: WriteBarrier + ?Sized> WriteBarrier for Arc<B> {
    #[inline]
    fn record_reference_store(&self, slot: usize, value: &ObjectRef) {
        (**self).record_reference_store(slot, value);
    }
}

/// For collectors that do not track stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBarrier;

impl WriteBarrier for NoBarrier {
    #[inline]
    fn record_reference_store(&self, _slot: usize, _value: &ObjectRef) {}
}

/// Marks the card (fixed size address range) containing every stored-to slot as dirty.
#[derive(Debug)]
pub struct CardMarkingBarrier {
    card_shift: u32,
    dirty: Mutex<HashSet<usize, ahash::RandomState>>,
    stores: AtomicUsize,
}

impl CardMarkingBarrier {
    /// `card_size` is rounded up to a power of two.
    pub fn new(card_size: usize) -> Self {
        let card_size = card_size.max(1).next_power_of_two();
        Self {
            card_shift: card_size.trailing_zeros(),
            dirty: Mutex::new(HashSet::default()),
            stores: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn card_of(&self, address: usize) -> usize {
        address >> self.card_shift
    }

    pub fn is_dirty(&self, address: usize) -> bool {
        self.dirty.lock().contains(&self.card_of(address))
    }

    /// Dirty cards in ascending order, clearing them.
    pub fn take_dirty(&self) -> Vec<usize> {
        let mut cards: Vec<usize> = self.dirty.lock().drain().collect();
        cards.sort_unstable();
        cards
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::Relaxed)
    }
}

impl Default for CardMarkingBarrier {
    fn default() -> Self {
        Self::new(DEFAULT_CARD_SIZE)
    }
}

impl WriteBarrier for CardMarkingBarrier {
    fn record_reference_store(&self, slot: usize, _value: &ObjectRef) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        let card = self.card_of(slot);
        self.dirty.lock().insert(card);
    }
}
