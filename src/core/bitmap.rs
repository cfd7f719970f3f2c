//! Growable bitmap tracking per-page flags
//!
//! One bit per page, 64 pages per word. Used to remember which pages changed since
//! their digest was last computed.

/// Bitmap over page numbers
///
/// - 0 = clean
/// - 1 = dirty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageBitmap {
    /// Bitmap words (each word = 64 pages)
    words: Vec<u64>,

    /// Number of pages tracked
    len: usize,

    /// Number of set bits
    set: usize,
}

impl PageBitmap {
    pub fn new(len: usize) -> Self {
        PageBitmap {
            words: vec![0u64; (len + 63) / 64],
            len,
            set: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits
    pub fn count_set(&self) -> usize {
        self.set
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Set or clear a bit, returning its previous value
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        if index >= self.len {
            return false;
        }

        let word = &mut self.words[index / 64];
        let mask = 1u64 << (index % 64);
        let previous = *word & mask != 0;
        if value && !previous {
            *word |= mask;
            self.set += 1;
        } else if !value && previous {
            *word &= !mask;
            self.set -= 1;
        }
        previous
    }

    /// Append one bit
    pub fn push(&mut self, value: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, value);
    }

    /// Remove the last bit, returning its value
    pub fn pop(&mut self) -> Option<bool> {
        if self.len == 0 {
            return None;
        }
        let value = self.set(self.len - 1, false);
        self.len -= 1;
        if self.len % 64 == 0 {
            self.words.pop();
        }
        Some(value)
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
        self.set = 0;
    }

    /// Indices of set bits, ascending
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, word)| **word != 0)
            .flat_map(|(word_idx, &word)| {
                (0..64)
                    .filter(move |bit| word & (1u64 << bit) != 0)
                    .map(move |bit| word_idx * 64 + bit)
            })
    }
}
