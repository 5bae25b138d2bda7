//! Run-history stores

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, instrument};

use super::query::{matches_all, sort_records, Filter, Sorter};
use super::RunRecord;

/// Records yielded by a query. Not restartable; query again to re-read.
pub type RecordIter = Box<dyn Iterator<Item = Result<RunRecord, StorageError>> + Send>;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error
    #[error("History IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("History serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored line could not be parsed
    #[error("Corrupt history entry at {}:{line}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistent record of task runs.
///
/// Implementations serialize their own appends; callers may share one store
/// across threads.
pub trait HistoryStore: Send + Sync {
    /// Append a record, assigning and returning its ID
    fn append(&self, record: RunRecord) -> Result<u64, StorageError>;

    /// Records matching every filter, ordered by the sorters.
    ///
    /// Without sorters records come back in append order.
    fn query(&self, filters: &[Filter], sorters: &[Sorter]) -> Result<RecordIter, StorageError>;

    /// First record matching every filter
    fn find_first(&self, filters: &[Filter]) -> Result<Option<RunRecord>, StorageError> {
        self.query(filters, &[])?.next().transpose()
    }
}

/// History kept in memory for the life of the process
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, mut record: RunRecord) -> Result<u64, StorageError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        record.id = records.last().map_or(1, |last| last.id + 1);
        let id = record.id;
        records.push(record);
        Ok(id)
    }

    fn query(&self, filters: &[Filter], sorters: &[Sorter]) -> Result<RecordIter, StorageError> {
        let mut matched: Vec<RunRecord> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| matches_all(filters, record))
            .cloned()
            .collect();
        sort_records(&mut matched, sorters);
        Ok(Box::new(matched.into_iter().map(Ok)))
    }
}

/// History in an append-only JSON-lines file, one record per line
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    next_id: Mutex<u64>,
}

impl JsonHistoryStore {
    /// Open the store at `path`, creating parent directories as needed
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut last_id = 0;
        if path.exists() {
            for record in read_records(path)? {
                last_id = last_id.max(record?.id);
            }
        }
        debug!(path = %path.display(), last_id, "opened run history");

        Ok(Self {
            path: path.to_path_buf(),
            next_id: Mutex::new(last_id + 1),
        })
    }

    /// Default location below a repository root
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(".gantry").join("history.jsonl")
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, mut record: RunRecord) -> Result<u64, StorageError> {
        let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        record.id = *next_id;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        *next_id += 1;
        debug!(id = record.id, task = %record.task_id(), "recorded run");
        Ok(record.id)
    }

    fn query(&self, filters: &[Filter], sorters: &[Sorter]) -> Result<RecordIter, StorageError> {
        if !self.path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }

        let filters = filters.to_vec();
        let matching = read_records(&self.path)?.filter(move |record| match record {
            Ok(record) => matches_all(&filters, record),
            Err(_) => true,
        });

        if sorters.is_empty() {
            return Ok(Box::new(matching));
        }

        let mut records = matching.collect::<Result<Vec<_>, _>>()?;
        sort_records(&mut records, sorters);
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

fn read_records(
    path: &Path,
) -> Result<impl Iterator<Item = Result<RunRecord, StorageError>> + Send, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    let path = path.to_path_buf();
    Ok(reader
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
        .map(move |(n, line)| -> Result<RunRecord, StorageError> {
            let line = line?;
            serde_json::from_str(&line).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                line: n + 1,
                source,
            })
        }))
}
