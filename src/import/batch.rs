//! Per-collection batches accumulated by the import writer

use crate::collection::Collection;
use crate::document::Document;

/// Pending documents for each collection, released once a batch is full.
#[derive(Debug)]
pub struct ImportBatches {
    threshold: usize,
    countries: Vec<Document>,
    states: Vec<Document>,
}

impl ImportBatches {
    /// Create empty batches that fill at `threshold` documents.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            countries: Vec::with_capacity(threshold),
            states: Vec::with_capacity(threshold),
        }
    }

    fn batch_mut(&mut self, collection: Collection) -> &mut Vec<Document> {
        match collection {
            Collection::Countries => &mut self.countries,
            Collection::States => &mut self.states,
        }
    }

    /// Append a document; returns the full batch when it reaches the threshold.
    pub fn push(&mut self, collection: Collection, document: Document) -> Option<Vec<Document>> {
        let threshold = self.threshold;
        let batch = self.batch_mut(collection);
        batch.push(document);
        if batch.len() >= threshold {
            Some(std::mem::replace(batch, Vec::with_capacity(threshold)))
        } else {
            None
        }
    }

    /// Take every non-empty remainder, leaving the batches empty.
    pub fn take_remaining(&mut self) -> Vec<(Collection, Vec<Document>)> {
        Collection::ALL
            .into_iter()
            .filter_map(|collection| {
                let batch = std::mem::take(self.batch_mut(collection));
                (!batch.is_empty()).then_some((collection, batch))
            })
            .collect()
    }

    /// Documents waiting across both collections.
    pub fn pending(&self) -> usize {
        self.countries.len() + self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
