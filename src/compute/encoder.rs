//! Genome <-> parameter table mapping.
//!
//! The slot layout is fixed when the encoder is created: genome position `i`
//! always addresses the same `(key, slot)` pair for the whole run.

use crate::schema::{CombinationKey, ParameterVector, ReferenceDataset};

/// Factor mapping genome values in `[0, 1]` to simulator amplitudes.
pub const AMPLITUDE_SCALE: f64 = 100.0;

/// Fixed genome-position -> `(key, slot)` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotIndex {
    /// Tunable keys in canonical order with their slot multiplicity.
    layout: Vec<(CombinationKey, usize)>,
    /// Flattened genome positions.
    slots: Vec<(CombinationKey, usize)>,
}

impl SlotIndex {
    /// Compute the layout: every key with more than one slot is tunable.
    pub fn from_reference(reference: &ReferenceDataset) -> Self {
        let layout: Vec<(CombinationKey, usize)> = reference
            .table()
            .rows()
            .filter(|(_, row)| row.entries.len() > 1)
            .map(|(key, row)| (key.clone(), row.entries.len()))
            .collect();

        let slots = layout
            .iter()
            .flat_map(|(key, count)| (0..*count).map(move |slot| (key.clone(), slot)))
            .collect();

        Self { layout, slots }
    }

    /// Number of tunable slots (genome length N).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `(key, slot)` addressed by a genome position.
    pub fn slot(&self, position: usize) -> Option<(&CombinationKey, usize)> {
        self.slots.get(position).map(|(key, slot)| (key, *slot))
    }

    /// Check that a dataset still has the structure this layout was built from.
    fn check(&self, reference: &ReferenceDataset) -> Result<(), EncodeError> {
        let tunable = reference
            .table()
            .rows()
            .filter(|(_, row)| row.entries.len() > 1)
            .count();
        if tunable != self.layout.len() {
            return Err(EncodeError::MalformedReferenceData(format!(
                "{} tunable keys, layout has {}",
                tunable,
                self.layout.len()
            )));
        }

        for (key, count) in &self.layout {
            let row = reference.table().get(key).ok_or_else(|| {
                EncodeError::MalformedReferenceData(format!("key {key} missing"))
            })?;
            if row.entries.len() != *count {
                return Err(EncodeError::MalformedReferenceData(format!(
                    "key {key} has {} slots, layout has {count}",
                    row.entries.len()
                )));
            }
        }

        Ok(())
    }
}

/// Bidirectional mapping between flat genomes and parameter tables.
#[derive(Debug, Clone)]
pub struct ParameterEncoder {
    index: SlotIndex,
}

impl ParameterEncoder {
    /// Build the encoder, fixing the slot layout for the run.
    pub fn new(reference: &ReferenceDataset) -> Self {
        Self {
            index: SlotIndex::from_reference(reference),
        }
    }

    /// Genome length N.
    pub fn genome_len(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &SlotIndex {
        &self.index
    }

    /// Merge a genome into the reference shape.
    pub fn build_parameter_vector(
        &self,
        genome: &[f64],
        reference: &ReferenceDataset,
    ) -> Result<ParameterVector, EncodeError> {
        if genome.len() != self.index.len() {
            return Err(EncodeError::GenomeLengthMismatch {
                expected: self.index.len(),
                found: genome.len(),
            });
        }
        self.index.check(reference)?;

        let mut table = reference.table().clone();
        for (value, (key, slot)) in genome.iter().zip(&self.index.slots) {
            // check() above guarantees the row and slot exist
            if let Some(entry) = table
                .get_mut(key)
                .and_then(|row| row.entries.get_mut(*slot))
            {
                entry.frequency = value * AMPLITUDE_SCALE;
            }
        }

        Ok(ParameterVector::from_table(table))
    }

    /// Read the tunable slots back into a genome.
    pub fn decode(&self, vector: &ParameterVector) -> Result<Vec<f64>, EncodeError> {
        self.index
            .slots
            .iter()
            .map(|(key, slot)| {
                vector
                    .frequency(key, *slot)
                    .map(|frequency| frequency / AMPLITUDE_SCALE)
                    .ok_or_else(|| {
                        EncodeError::MalformedReferenceData(format!(
                            "parameter table lacks key {key} slot {slot}"
                        ))
                    })
            })
            .collect()
    }
}

/// Encoding errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Reference data inconsistent with slot layout: {0}")]
    MalformedReferenceData(String),
    #[error("Genome has {found} genes, expected {expected}")]
    GenomeLengthMismatch { expected: usize, found: usize },
}
