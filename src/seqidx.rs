use crate::sequence_index::ReferenceSource;
use rustc_hash::FxHashMap;

/// Chromosome id <-> name/length lookup; ids are dense and start at 0
#[derive(Debug, Default, Clone)]
pub struct ChromosomeIndex {
    name_to_id: FxHashMap<String, u32>,
    names: Vec<String>,
    lengths: Vec<usize>,
}

impl ChromosomeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every sequence of a reference, ids assigned in natural name order.
    pub fn from_reference(reference: &dyn ReferenceSource) -> Self {
        let mut sequences = reference.sequence_lengths();
        sequences.sort_by(|a, b| natord::compare(&a.0, &b.0));

        let mut index = Self::new();
        for (name, length) in sequences {
            index.get_or_insert_id(&name, length);
        }
        index
    }

    pub fn get_or_insert_id(&mut self, name: &str, length: usize) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.name_to_id.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        self.lengths.push(length);
        id
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn get_len_from_id(&self, id: u32) -> Option<usize> {
        self.lengths.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
