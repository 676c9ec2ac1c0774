//! Process id allocation.

/// Number of distinct process ids the one-byte header field can carry.
pub const PROCESS_ID_COUNT: usize = 256;

const WORDS: usize = PROCESS_ID_COUNT / 64;

/// Bitset allocator over `0..=255` that hands out the lowest free id.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    used: [u64; WORDS],
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest free id, or `None` when all 256 are taken.
    pub fn allocate(&mut self) -> Option<u8> {
        for (word_index, word) in self.used.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1u64 << bit;
                return u8::try_from(word_index * 64 + bit).ok();
            }
        }
        None
    }

    /// Reserve a specific id. Returns false if it was already taken.
    pub fn claim(&mut self, id: u8) -> bool {
        let (word, mask) = Self::slot(id);
        let taken = self.used[word] & mask != 0;
        self.used[word] |= mask;
        !taken
    }

    /// Return an id to the pool. Releasing a free id is a no-op.
    pub fn release(&mut self, id: u8) {
        let (word, mask) = Self::slot(id);
        self.used[word] &= !mask;
    }

    pub fn is_used(&self, id: u8) -> bool {
        let (word, mask) = Self::slot(id);
        self.used[word] & mask != 0
    }

    /// Number of ids currently reserved.
    pub fn in_use(&self) -> usize {
        self.used.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.used = [0; WORDS];
    }

    fn slot(id: u8) -> (usize, u64) {
        let id = usize::from(id);
        (id / 64, 1u64 << (id % 64))
    }
}
