//! Process-wide cast result cache.
//!
//! The table is an array of buckets, each bucket a fixed number of slots. Every slot carries a
//! version stamp: even means stable, odd means a write is in progress. Readers validate the
//! stamp before and after copying a slot out and give up on that slot if it moved, so a torn
//! entry is never observed and a lookup never spins.
//!
//! Writers claim a slot by moving its stamp from even to odd with a compare-exchange. Losing
//! that race just drops the write, the cache is an optimisation and the next miss will try
//! again.
//!
//! Growth builds a table twice the size, copies every stable entry over and swaps the table
//! pointer. Threads still holding the old table keep reading it safely, crossbeam's epoch
//! reclamation frees it once nobody is pinned on it anymore.
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering, fence};

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use log::debug;
use parking_lot::Mutex;

use crate::{CastResult, TypeHandle, Verdict};

// fixed so that every table hashes a query to the same bucket index bits
const HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

const EMPTY: usize = 0;

#[derive(Debug, Default, Clone)]
pub struct CastCacheCreateInfo {
    /// rounded up to a power of two
    pub initial_buckets: Option<usize>,
    /// clamped to 1..=16
    pub slots_per_bucket: Option<usize>,
    /// growth stops here, rounded up to a power of two
    pub max_buckets: Option<usize>,
    /// occupancy (in percent of all slots) that triggers growth
    pub load_factor_percent: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct CastCacheSettings {
    initial_buckets: usize,
    slots_per_bucket: usize,
    max_buckets: usize,
    load_factor_percent: usize,
}

impl Default for CastCacheSettings {
    fn default() -> Self {
        Self {
            initial_buckets: 256,
            slots_per_bucket: 4,
            max_buckets: 1 << 20,
            load_factor_percent: 75,
        }
    }
}

impl CastCacheSettings {
    pub fn from_info(info: &CastCacheCreateInfo) -> Self {
        let mut settings = Self::default();
        info.initial_buckets
            .inspect(|&val| settings.initial_buckets = val);
        info.slots_per_bucket
            .inspect(|&val| settings.slots_per_bucket = val);
        info.max_buckets.inspect(|&val| settings.max_buckets = val);
        info.load_factor_percent
            .inspect(|&val| settings.load_factor_percent = val);

        settings.initial_buckets = settings.initial_buckets.max(1).next_power_of_two();
        settings.max_buckets = settings
            .max_buckets
            .max(settings.initial_buckets)
            .next_power_of_two();
        settings.slots_per_bucket = settings.slots_per_bucket.clamp(1, 16);
        settings.load_factor_percent = settings.load_factor_percent.clamp(10, 100);
        settings
    }

    #[inline]
    pub fn initial_buckets(&self) -> usize {
        self.initial_buckets
    }

    #[inline]
    pub fn slots_per_bucket(&self) -> usize {
        self.slots_per_bucket
    }

    #[inline]
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    #[inline]
    pub fn load_factor_percent(&self) -> usize {
        self.load_factor_percent
    }
}

/// Point-in-time view of the cache, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastCacheStats {
    pub buckets: usize,
    pub slots_per_bucket: usize,
    pub occupied: usize,
    pub growths: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    source: usize,
    target: usize,
    verdict: Verdict,
}

#[derive(Debug, Default)]
struct Slot {
    version: AtomicU64,
    source: AtomicUsize,
    target: AtomicUsize,
    verdict: AtomicU8,
}

#[derive(Debug)]
struct CacheTable {
    slots: Box<[Slot]>,
    bucket_mask: usize,
    slots_per_bucket: usize,
    occupied: AtomicUsize,
    grow_at: usize,
}

#[derive(Debug)]
pub struct CastCache {
    table: Atomic<CacheTable>,
    settings: CastCacheSettings,
    hasher: ahash::RandomState,
    grow_lock: Mutex<()>,
    // bumped by every write and growth
    version: AtomicU64,
    growths: AtomicUsize,
}

impl Entry {
    #[inline]
    fn matches(&self, source: usize, target: usize) -> bool {
        self.source == source && self.target == target
    }
}

impl Slot {
    /// Stable contents, or `None` if the slot is empty or a writer got in the way.
    #[inline]
    fn read(&self) -> Option<Entry> {
        let before = self.version.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }

        let source = self.source.load(Ordering::Relaxed);
        let target = self.target.load(Ordering::Relaxed);
        let verdict = self.verdict.load(Ordering::Relaxed);

        fence(Ordering::Acquire);
        let after = self.version.load(Ordering::Relaxed);

        if before != after || source == EMPTY {
            return None;
        }
        Some(Entry {
            source,
            target,
            verdict: Verdict::from_bits(verdict),
        })
    }

    /// Unvalidated key, good enough to choose which slot to claim.
    #[inline]
    fn key_hint(&self) -> (usize, usize) {
        (
            self.source.load(Ordering::Relaxed),
            self.target.load(Ordering::Relaxed),
        )
    }

    /// `Some(was_empty)` if the write went through, `None` if another writer owns the slot.
    fn try_write(&self, entry: Entry) -> Option<bool> {
        let stable = self.version.load(Ordering::Relaxed);
        if stable & 1 == 1 {
            return None;
        }
        self.version
            .compare_exchange(stable, stable + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        // the odd stamp must be visible before any of the new contents
        fence(Ordering::Release);

        let was_empty = self.source.load(Ordering::Relaxed) == EMPTY;
        self.source.store(entry.source, Ordering::Relaxed);
        self.target.store(entry.target, Ordering::Relaxed);
        self.verdict.store(entry.verdict as u8, Ordering::Relaxed);

        self.version.store(stable + 2, Ordering::Release);
        Some(was_empty)
    }
}

impl CacheTable {
    fn new(buckets: usize, slots_per_bucket: usize, load_factor_percent: usize) -> Self {
        debug_assert!(buckets.is_power_of_two());
        let capacity = buckets * slots_per_bucket;
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            slots,
            bucket_mask: buckets - 1,
            slots_per_bucket,
            occupied: AtomicUsize::new(0),
            grow_at: (capacity * load_factor_percent / 100).max(1),
        }
    }

    #[inline]
    fn buckets(&self) -> usize {
        self.bucket_mask + 1
    }

    #[inline]
    fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &[Slot] {
        let start = (hash as usize & self.bucket_mask) * self.slots_per_bucket;
        &self.slots[start..start + self.slots_per_bucket]
    }

    #[inline]
    fn get(&self, hash: u64, source: usize, target: usize) -> CastResult {
        for slot in self.bucket(hash) {
            match slot.read() {
                Some(entry) if entry.matches(source, target) => return entry.verdict.into(),
                _ => {}
            }
        }
        CastResult::Indeterminate
    }

    /// Prefers the slot already holding this query, then an empty slot, then `victim`.
    /// Returns true if the write filled a previously empty slot.
    fn set(&self, hash: u64, entry: Entry, victim: usize) -> bool {
        let bucket = self.bucket(hash);

        let mut empty = None;
        let mut chosen = None;
        for (index, slot) in bucket.iter().enumerate() {
            let (source, target) = slot.key_hint();
            if source == entry.source && target == entry.target {
                chosen = Some(index);
                break;
            }
            if source == EMPTY && empty.is_none() {
                empty = Some(index);
            }
        }
        let index = chosen.or(empty).unwrap_or(victim % bucket.len());

        match bucket[index].try_write(entry) {
            Some(true) => {
                self.occupied.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

impl CastCache {
    pub fn new(info: CastCacheCreateInfo) -> Self {
        let settings = CastCacheSettings::from_info(&info);
        let table = CacheTable::new(
            settings.initial_buckets,
            settings.slots_per_bucket,
            settings.load_factor_percent,
        );
        debug!(
            "cast cache created: {} buckets x {} slots, max {} buckets",
            settings.initial_buckets, settings.slots_per_bucket, settings.max_buckets
        );
        Self {
            table: Atomic::new(table),
            settings,
            hasher: ahash::RandomState::with_seeds(
                HASH_SEEDS[0],
                HASH_SEEDS[1],
                HASH_SEEDS[2],
                HASH_SEEDS[3],
            ),
            grow_lock: Mutex::new(()),
            version: AtomicU64::new(0),
            growths: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn settings(&self) -> &CastCacheSettings {
        &self.settings
    }

    #[inline]
    fn hash(&self, source: usize, target: usize) -> u64 {
        self.hasher.hash_one((source, target))
    }

    #[inline]
    fn current<'g>(&self, guard: &'g Guard) -> (Shared<'g, CacheTable>, &'g CacheTable) {
        let shared = self.table.load(Ordering::Acquire, guard);
        // SAFETY: the pointer is never null, and a replaced table is only destroyed after
        // every thread pinned at the time of the swap (including us) has unpinned
        let table = unsafe { shared.deref() };
        (shared, table)
    }

    /// Cached answer for `source -> target`, `Indeterminate` on a miss or a racing write.
    #[inline]
    pub fn try_get(&self, source: TypeHandle, target: TypeHandle) -> CastResult {
        if source == target {
            return CastResult::CanCast;
        }
        let guard = epoch::pin();
        let (_, table) = self.current(&guard);
        table.get(self.hash(source.addr(), target.addr()), source.addr(), target.addr())
    }

    /// Memoize a verdict. Only call this with answers that are safe to reuse forever.
    pub fn try_set(&self, source: TypeHandle, target: TypeHandle, verdict: Verdict) {
        if source == target {
            return;
        }
        let guard = epoch::pin();
        let (shared, table) = self.current(&guard);

        let stamp = self.version.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            source: source.addr(),
            target: target.addr(),
            verdict,
        };
        let filled = table.set(self.hash(entry.source, entry.target), entry, stamp as usize);

        if filled
            && table.occupied() >= table.grow_at
            && table.buckets() < self.settings.max_buckets
        {
            self.grow_from(shared, &guard);
        }
    }

    /// Double the table now. Returns false if another thread is already growing it or the
    /// table is at its maximum size.
    pub fn grow(&self) -> bool {
        let guard = epoch::pin();
        let (shared, _) = self.current(&guard);
        self.grow_from(shared, &guard)
    }

    fn grow_from<'g>(&self, expected: Shared<'g, CacheTable>, guard: &'g Guard) -> bool {
        let Some(_growing) = self.grow_lock.try_lock() else {
            return false;
        };
        // somebody else finished a growth between our load and the lock
        if self.table.load(Ordering::Acquire, guard) != expected {
            return false;
        }
        // SAFETY: `expected` is still the installed table and we are pinned
        let old = unsafe { expected.deref() };
        if old.buckets() >= self.settings.max_buckets {
            return false;
        }

        let grown = CacheTable::new(
            old.buckets() * 2,
            self.settings.slots_per_bucket,
            self.settings.load_factor_percent,
        );
        let mut migrated = 0usize;
        for slot in old.slots.iter() {
            if let Some(entry) = slot.read() {
                grown.set(self.hash(entry.source, entry.target), entry, 0);
                migrated += 1;
            }
        }
        let buckets = grown.buckets();

        let previous = self.table.swap(Owned::new(grown), Ordering::AcqRel, guard);
        // SAFETY: `previous` is no longer reachable through `self.table`, readers that still
        // hold it are pinned and the epoch defers destruction until they are gone
        unsafe { guard.defer_destroy(previous) };

        self.version.fetch_add(1, Ordering::Relaxed);
        self.growths.fetch_add(1, Ordering::Relaxed);
        debug!(
            "cast cache grown: {} -> {} buckets, {} entries migrated",
            old.buckets(),
            buckets,
            migrated
        );
        true
    }

    pub fn stats(&self) -> CastCacheStats {
        let guard = epoch::pin();
        let (_, table) = self.current(&guard);
        CastCacheStats {
            buckets: table.buckets(),
            slots_per_bucket: table.slots_per_bucket,
            occupied: table.occupied(),
            growths: self.growths.load(Ordering::Relaxed),
            version: self.version.load(Ordering::Relaxed),
        }
    }
}

impl Default for CastCache {
    fn default() -> Self {
        Self::new(CastCacheCreateInfo::default())
    }
}

impl Drop for CastCache {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can be reading the table
        unsafe {
            let guard = epoch::unprotected();
            let table = self.table.load(Ordering::Relaxed, guard);
            if !table.is_null() {
                drop(table.into_owned());
            }
        }
    }
}
