//! The NFSv4 attribute bitmap (`bitmap4`).
//!
//! On the wire a bitmap is a counted array of 32-bit words; bit `n % 32` of
//! word `n / 32` stands for attribute id `n`. Trailing zero words are
//! dropped when encoding.

/// A set of attribute ids in bitmap form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
}

impl Bitmap {
    /// Builds a bitmap from attribute ids.
    pub fn from_ids<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let mut bitmap = Bitmap::default();
        for id in ids {
            bitmap.insert(id);
        }
        bitmap
    }

    /// Interprets wire words as a bitmap.
    pub fn from_words(words: &[u32]) -> Self {
        let mut words = words.to_vec();
        while words.last() == Some(&0) {
            words.pop();
        }
        Bitmap { words }
    }

    pub fn insert(&mut self, id: u32) {
        let word = (id / 32) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (id % 32);
    }

    pub fn contains(&self, id: u32) -> bool {
        let word = (id / 32) as usize;
        self.words.get(word).is_some_and(|w| w & (1 << (id % 32)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// The highest id that could be set, exclusive.
    pub fn id_limit(&self) -> u32 {
        (self.words.len() * 32) as u32
    }

    /// The set ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.id_limit()).filter(|id| self.contains(*id))
    }

    /// The wire representation.
    pub fn words(&self) -> Vec<u32> {
        self.words.clone()
    }
}

impl std::fmt::Display for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.ids().map(super::attrs::attr_name).collect();
        write!(f, "{}", names.join(","))
    }
}
