use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{CorrectionRecord, CorrectionStore};
use crate::error::Result;

/// In-memory correction database.
///
/// Can be loaded from and written to a JSON file of the form
/// `{"datasets": {"PixelGain": [{"orbit": 100, "fields": {...}}, ...]}}`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    datasets: BTreeMap<String, BTreeMap<i32, CorrectionRecord>>,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    datasets: BTreeMap<String, Vec<CorrectionRecord>>,
}

impl MemoryStore {
    /// Add a record, replacing any record of the same dataset and orbit.
    pub fn insert(&mut self, dataset: impl Into<String>, record: CorrectionRecord) {
        self.datasets
            .entry(dataset.into())
            .or_default()
            .insert(record.orbit, record);
    }

    /// Number of records of a dataset.
    #[must_use]
    pub fn len(&self, dataset: &str) -> usize {
        self.datasets.get(dataset).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.values().all(BTreeMap::is_empty)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// # Errors
    /// If the file cannot be read or is not a valid store file.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file: StoreFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let mut store = MemoryStore::default();
        for (dataset, records) in file.datasets {
            for rec in records {
                store.insert(dataset.clone(), rec);
            }
        }
        Ok(store)
    }

    /// # Errors
    /// If the file cannot be created or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = StoreFile {
            datasets: self
                .datasets
                .iter()
                .map(|(k, v)| (k.clone(), v.values().cloned().collect()))
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.flush()?;
        Ok(())
    }
}

impl CorrectionStore for MemoryStore {
    fn fetch(&self, dataset: &str, orbit: i32) -> Option<&CorrectionRecord> {
        self.datasets.get(dataset)?.get(&orbit)
    }
}
