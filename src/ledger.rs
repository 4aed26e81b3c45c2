//! Bounded, persisted record of the fingerprints already seen for one search partition.
//!
//! The whole ledger is stored as a single `#`-joined string per partition, so a run costs
//! one read and one write. Runs against the same partition must not overlap: the
//! load/reconcile/save cycle is not locked and concurrent runs lose updates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use url::form_urlencoded::byte_serialize;

use crate::offer::{Fingerprint, OfferSource};
use crate::{Error, Result};

pub const LEDGER_DELIMITER: char = '#';

/// Key of the dedup state for one marketplace search.
pub fn partition_key(source: OfferSource, search_query: &str) -> String {
    format!("{}-{}", source.as_str(), search_query)
}

/// Durable key-value collaborator holding one opaque string per partition.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, partition_key: &str) -> Result<Option<String>>;
    async fn put(&self, partition_key: &str, value: String) -> Result<()>;
}

/// Outcome of folding a batch of fingerprints into a ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Fingerprints not seen before, in the order they arrived.
    pub fresh: Vec<Fingerprint>,
    /// Number of entries dropped from the front to stay within capacity.
    pub evicted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    partition_key: String,
    capacity: usize,
    entries: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

impl Ledger {
    pub fn new(partition_key: impl Into<String>, capacity: usize) -> Self {
        Self {
            partition_key: partition_key.into(),
            capacity,
            entries: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Reads the ledger of `partition_key`. A partition with nothing stored is empty.
    pub async fn load(
        store: &dyn LedgerStore,
        partition_key: &str,
        capacity: usize,
    ) -> Result<Self> {
        let ledger = match store.get(partition_key).await? {
            Some(blob) => Self::decode(partition_key, capacity, &blob),
            None => Self::new(partition_key, capacity),
        };
        debug!(partition = partition_key, entries = ledger.len(), "loaded ledger");
        Ok(ledger)
    }

    pub async fn save(&self, store: &dyn LedgerStore) -> Result<()> {
        store.put(&self.partition_key, self.encode()).await?;
        debug!(partition = %self.partition_key, entries = self.len(), "saved ledger");
        Ok(())
    }

    /// Rebuilds a ledger from its stored form. Empty segments and repeats are ignored.
    pub fn decode(partition_key: &str, capacity: usize, blob: &str) -> Self {
        let mut ledger = Self::new(partition_key, capacity);
        for segment in blob.split(LEDGER_DELIMITER).filter(|s| !s.is_empty()) {
            let fingerprint = Fingerprint::from_encoded(segment);
            if ledger.members.insert(fingerprint.clone()) {
                ledger.entries.push_back(fingerprint);
            }
        }
        ledger
    }

    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(Fingerprint::as_str)
            .collect::<Vec<_>>()
            .join(&LEDGER_DELIMITER.to_string())
    }

    /// Classifies `incoming` as new or seen and appends the new ones.
    ///
    /// Entries are evicted first-in first-out, never refreshed by being seen again. When
    /// the batch alone exceeds the capacity only its most recent entries are kept.
    pub fn reconcile<I>(&mut self, incoming: I) -> Reconciliation
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let mut fresh = Vec::new();
        let mut batch = HashSet::new();
        for fingerprint in incoming {
            if !self.members.contains(&fingerprint) && batch.insert(fingerprint.clone()) {
                fresh.push(fingerprint);
            }
        }

        let overflow = (self.entries.len() + fresh.len()).saturating_sub(self.capacity);
        let mut evicted = 0;
        while evicted < overflow {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            self.members.remove(&oldest);
            evicted += 1;
        }

        // Whatever the old entries could not absorb comes off the front of the batch.
        let skip = fresh.len().saturating_sub(self.capacity);
        for fingerprint in fresh.iter().skip(skip) {
            self.members.insert(fingerprint.clone());
            self.entries.push_back(fingerprint.clone());
        }
        evicted += skip;

        if evicted > 0 {
            info!(partition = %self.partition_key, evicted, "ledger at capacity");
        }

        Reconciliation { fresh, evicted }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.iter()
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Keeps one file per partition below a directory.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    dir: PathBuf,
}

impl FileLedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encodes the key so distinct partitions never share a file.
    fn path_for(&self, partition_key: &str) -> PathBuf {
        let name: String = byte_serialize(partition_key.as_bytes()).collect();
        self.dir.join(format!("{name}.ledger"))
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn get(&self, partition_key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(partition_key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(format!("reading {partition_key}: {e}"))),
        }
    }

    async fn put(&self, partition_key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(partition_key);
        let tmp = path.with_extension("ledger.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| Error::Store(format!("writing {partition_key}: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Store(format!("replacing {partition_key}: {e}")))?;
        Ok(())
    }
}

/// In-process store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get(&self, partition_key: &str) -> Result<Option<String>> {
        let map = self
            .inner
            .lock()
            .map_err(|_| Error::Store("memory store poisoned".into()))?;
        Ok(map.get(partition_key).cloned())
    }

    async fn put(&self, partition_key: &str, value: String) -> Result<()> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| Error::Store("memory store poisoned".into()))?;
        map.insert(partition_key.to_string(), value);
        Ok(())
    }
}
