use crate::search::{Bound, Depth, HashSize, MoveCode, Score, Transposition};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering::Relaxed};

const CLUSTER: usize = 4;

#[derive(Debug, Default)]
struct Slot {
    data: AtomicU64,
    meta: AtomicU64,
}

impl Slot {
    #[inline(always)]
    fn key16(meta: u64) -> u16 {
        meta as u16
    }

    #[inline(always)]
    fn depth(meta: u64) -> Depth {
        Depth::new((meta >> 16) as u16 as i16 as i32)
    }

    #[inline(always)]
    fn generation(meta: u64) -> u8 {
        (meta >> 32) as u8
    }

    #[inline(always)]
    fn bound(meta: u64) -> Bound {
        Bound::from_bits((meta >> 40) as u8)
    }

    #[inline(always)]
    fn meta(key16: u16, depth: Depth, generation: u8, bound: Bound) -> u64 {
        key16 as u64
            | (depth.get() as i16 as u16 as u64) << 16
            | (generation as u64) << 32
            | (bound as u64) << 40
            | 1 << 48
    }
}

/// The shared transposition table.
///
/// A lossy, generation-tagged cache of search results. Entries are read
/// and written with relaxed atomics and no locking; a torn entry is
/// detected no further than by its key tag, which is why probed moves
/// are always re-validated against the legal move list before use.
#[derive(Debug)]
pub struct TranspositionTable {
    slots: Vec<Slot>,
    generation: AtomicU8,
}

impl TranspositionTable {
    fn size_to_len(size: HashSize) -> usize {
        let len = size.get() * (1 << 20) / size_of::<Slot>();
        len / CLUSTER * CLUSTER
    }

    pub fn new(size: HashSize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(Self::size_to_len(size), Slot::default);

        TranspositionTable {
            slots,
            generation: AtomicU8::new(0),
        }
    }

    /// The number of entries the table can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Discards all cached results and reallocates to the given size.
    pub fn resize(&mut self, size: HashSize) {
        self.slots.clear();
        self.slots.resize_with(Self::size_to_len(size), Slot::default);
    }

    /// Forgets all cached results.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.data.store(0, Relaxed);
            slot.meta.store(0, Relaxed);
        }
    }

    /// Starts a new search, aging out entries from previous ones.
    pub fn new_search(&self) {
        self.generation.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    fn cluster(&self, key: u64) -> usize {
        let index = ((key as u128 * self.slots.len() as u128) >> 64) as usize;
        index / CLUSTER * CLUSTER
    }

    /// Looks up the entry for a position key.
    #[inline(always)]
    pub fn probe(&self, key: u64) -> Option<Transposition> {
        if self.slots.is_empty() {
            return None;
        }

        let cluster = self.cluster(key);
        let key16 = (key >> 48) as u16;

        for slot in &self.slots[cluster..cluster + CLUSTER] {
            let meta = slot.meta.load(Relaxed);
            if meta != 0 && Slot::key16(meta) == key16 {
                let data = slot.data.load(Relaxed);
                return Some(Transposition::from_bits(
                    data,
                    Slot::depth(meta),
                    Slot::bound(meta),
                ));
            }
        }

        None
    }

    /// Caches a search result for a position key.
    ///
    /// An entry for the same position is overwritten, keeping its move
    /// when the new result has none; otherwise the shallowest entry of
    /// the oldest generation makes room.
    #[inline(always)]
    pub fn store(
        &self,
        key: u64,
        value: Score,
        bound: Bound,
        depth: Depth,
        mv: MoveCode,
        eval: Option<Score>,
        margin: Score,
    ) {
        if self.slots.is_empty() {
            return;
        }

        let cluster = self.cluster(key);
        let key16 = (key >> 48) as u16;
        let generation = self.generation.load(Relaxed);

        let mut victim = cluster;
        let mut victim_score = i32::MAX;
        let mut mv = mv;

        for (i, slot) in self.slots[cluster..cluster + CLUSTER].iter().enumerate() {
            let meta = slot.meta.load(Relaxed);

            if meta == 0 || Slot::key16(meta) == key16 {
                // Preserve the old move if the new result has none.
                if meta != 0 && !mv.is_some() {
                    mv = MoveCode::from_bits(slot.data.load(Relaxed) as u16);
                }

                victim = cluster + i;
                break;
            }

            let age = generation.wrapping_sub(Slot::generation(meta)) as i32;
            let score = Slot::depth(meta).get() - 256 * age;

            if score < victim_score {
                victim_score = score;
                victim = cluster + i;
            }
        }

        let entry = Transposition::new(mv, value, bound, depth, eval, margin);
        let slot = &self.slots[victim];
        slot.data.store(entry.to_bits(), Relaxed);
        slot.meta
            .store(Slot::meta(key16, depth, generation, bound), Relaxed);
    }

    /// Marks the entry for a position key as belonging to this search.
    #[inline(always)]
    pub fn refresh(&self, key: u64) {
        if self.slots.is_empty() {
            return;
        }

        let cluster = self.cluster(key);
        let key16 = (key >> 48) as u16;
        let generation = self.generation.load(Relaxed);

        for slot in &self.slots[cluster..cluster + CLUSTER] {
            let meta = slot.meta.load(Relaxed);
            if meta != 0 && Slot::key16(meta) == key16 {
                let refreshed = Slot::meta(
                    key16,
                    Slot::depth(meta),
                    generation,
                    Slot::bound(meta),
                );

                slot.meta.store(refreshed, Relaxed);
                return;
            }
        }
    }
}
