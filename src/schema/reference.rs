//! Reference frequency data and the parameter tables derived from it.
//!
//! Both the reference dataset and every [`ParameterVector`] share one on-disk
//! shape: a JSON object keyed by a stringified boolean tuple (`"[0, 1, 1]"`)
//! whose values are ordered `[label, frequency]` pairs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A boolean combination over the problem's symbols.
///
/// Ordering is lexicographic with `false < true` and the first position most
/// significant, which is the canonical iteration order for slot indexing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CombinationKey(Vec<bool>);

impl CombinationKey {
    pub fn new(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// Parse a key such as `"[0, 1, 1]"`, `"(0,1,1)"` or `"[true, false]"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .or_else(|| trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')))?;

        if inner.trim().is_empty() {
            return None;
        }

        inner
            .split(',')
            .map(|part| match part.trim() {
                "0" | "false" | "False" => Some(false),
                "1" | "true" | "True" => Some(true),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// Number of symbols in the combination.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, bit) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", u8::from(*bit))?;
        }
        write!(f, "]")
    }
}

/// One `[label, frequency]` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyEntry {
    /// Opaque label as found in the source document.
    pub label: Value,
    /// Frequency (percent amplitude in the simulator's domain).
    pub frequency: f64,
}

impl Serialize for FrequencyEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.label)?;
        seq.serialize_element(&self.frequency)?;
        seq.end()
    }
}

/// A key's original spelling plus its ordered frequency slots.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Key exactly as written in the source document.
    pub raw_key: String,
    /// Ordered frequency slots.
    pub entries: Vec<FrequencyEntry>,
}

/// Frequency table in canonical key order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrequencyTable {
    rows: BTreeMap<CombinationKey, TableRow>,
}

impl FrequencyTable {
    /// Iterate rows in canonical key order.
    pub fn rows(&self) -> impl Iterator<Item = (&CombinationKey, &TableRow)> {
        self.rows.iter()
    }

    pub fn get(&self, key: &CombinationKey) -> Option<&TableRow> {
        self.rows.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &CombinationKey) -> Option<&mut TableRow> {
        self.rows.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse a table from a JSON document.
    pub fn from_json(document: &Value) -> Result<Self, ReferenceError> {
        let object = document.as_object().ok_or(ReferenceError::NotAnObject)?;

        let mut rows = BTreeMap::new();
        let mut arity: Option<usize> = None;

        for (raw_key, value) in object {
            let key = CombinationKey::parse(raw_key).ok_or_else(|| ReferenceError::InvalidKey {
                key: raw_key.clone(),
            })?;

            match arity {
                Some(expected) if expected != key.arity() => {
                    return Err(ReferenceError::ArityMismatch {
                        key: raw_key.clone(),
                        expected,
                        found: key.arity(),
                    });
                }
                None => arity = Some(key.arity()),
                _ => {}
            }

            let pairs = value.as_array().ok_or_else(|| ReferenceError::InvalidEntry {
                key: raw_key.clone(),
                slot: 0,
            })?;

            let entries = pairs
                .iter()
                .enumerate()
                .map(|(slot, pair)| parse_pair(raw_key, slot, pair))
                .collect::<Result<Vec<_>, _>>()?;

            let row = TableRow {
                raw_key: raw_key.clone(),
                entries,
            };

            if let Some(previous) = rows.insert(key, row) {
                return Err(ReferenceError::DuplicateKey {
                    first: previous.raw_key,
                    second: raw_key.clone(),
                });
            }
        }

        if rows.is_empty() {
            return Err(ReferenceError::Empty);
        }

        Ok(Self { rows })
    }

    /// Build a table directly from rows (used by tests and synthetic data).
    pub fn from_rows<I>(rows: I) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = (CombinationKey, Vec<FrequencyEntry>)>,
    {
        let mut table = BTreeMap::new();
        let mut arity: Option<usize> = None;

        for (key, entries) in rows {
            let raw_key = key.to_string();
            match arity {
                Some(expected) if expected != key.arity() => {
                    return Err(ReferenceError::ArityMismatch {
                        key: raw_key,
                        expected,
                        found: key.arity(),
                    });
                }
                None => arity = Some(key.arity()),
                _ => {}
            }
            if table
                .insert(key, TableRow { raw_key: raw_key.clone(), entries })
                .is_some()
            {
                return Err(ReferenceError::DuplicateKey {
                    first: raw_key.clone(),
                    second: raw_key,
                });
            }
        }

        if table.is_empty() {
            return Err(ReferenceError::Empty);
        }

        Ok(Self { rows: table })
    }
}

impl Serialize for FrequencyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for row in self.rows.values() {
            map.serialize_entry(&row.raw_key, &row.entries)?;
        }
        map.end()
    }
}

fn parse_pair(raw_key: &str, slot: usize, pair: &Value) -> Result<FrequencyEntry, ReferenceError> {
    let invalid = || ReferenceError::InvalidEntry {
        key: raw_key.to_string(),
        slot,
    };

    match pair.as_array().map(Vec::as_slice) {
        Some([label, frequency]) => Ok(FrequencyEntry {
            label: label.clone(),
            frequency: frequency.as_f64().ok_or_else(invalid)?,
        }),
        _ => Err(invalid()),
    }
}

/// Immutable reference dataset, loaded once per process.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDataset {
    table: FrequencyTable,
    arity: usize,
    source: Option<PathBuf>,
}

impl ReferenceDataset {
    /// Wrap a parsed table.
    pub fn new(table: FrequencyTable) -> Result<Self, ReferenceError> {
        let arity = table
            .rows()
            .next()
            .map(|(key, _)| key.arity())
            .ok_or(ReferenceError::Empty)?;
        Ok(Self {
            table,
            arity,
            source: None,
        })
    }

    /// Load a dataset from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_json::from_str(&content)?;
        let mut dataset = Self::new(FrequencyTable::from_json(&document)?)?;
        let source = fs::canonicalize(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        dataset.source = Some(source);
        Ok(dataset)
    }

    /// Number of symbols per combination key.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn table(&self) -> &FrequencyTable {
        &self.table
    }

    /// Absolute path of the file the dataset was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Simulator-ready parameter table: the reference shape with tunable slots
/// overwritten from a genome. Only the encoder constructs one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterVector {
    table: FrequencyTable,
}

impl ParameterVector {
    pub(crate) fn from_table(table: FrequencyTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &FrequencyTable {
        &self.table
    }

    /// Frequency at a given key and slot.
    pub fn frequency(&self, key: &CombinationKey, slot: usize) -> Option<f64> {
        self.table
            .get(key)
            .and_then(|row| row.entries.get(slot))
            .map(|entry| entry.frequency)
    }

    /// Pretty JSON in the reference file format.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Reference data errors.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Failed to read reference data {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Reference data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reference data must be a JSON object keyed by combination")]
    NotAnObject,
    #[error("Reference data contains no combinations")]
    Empty,
    #[error("Invalid combination key {key:?}")]
    InvalidKey { key: String },
    #[error("Key {key:?} has arity {found}, expected {expected}")]
    ArityMismatch {
        key: String,
        expected: usize,
        found: usize,
    },
    #[error("Keys {first:?} and {second:?} name the same combination")]
    DuplicateKey { first: String, second: String },
    #[error("Key {key:?} slot {slot} is not a [label, frequency] pair")]
    InvalidEntry { key: String, slot: usize },
}
