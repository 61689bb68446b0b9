//! Pin roots and the named pin registry.

use crate::error::{Error, Result};
use crate::hash::Cid;
use crate::store::FsBlockstore;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// The set of cids explicitly protected from collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinRoots {
    roots: HashSet<Cid>,
}

impl PinRoots {
    /// Create an empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root. Returns false if it was already pinned.
    pub fn add(&mut self, cid: Cid) -> bool {
        self.roots.insert(cid)
    }

    /// Remove a root. Returns false if it was not pinned.
    pub fn remove(&mut self, cid: &Cid) -> bool {
        self.roots.remove(cid)
    }

    /// Check if a cid is a root.
    pub fn contains(&self, cid: &Cid) -> bool {
        self.roots.contains(cid)
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns true if nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over the roots in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Cid> {
        self.roots.iter()
    }
}

impl FromIterator<Cid> for PinRoots {
    fn from_iter<I: IntoIterator<Item = Cid>>(iter: I) -> Self {
        Self {
            roots: iter.into_iter().collect(),
        }
    }
}

/// Manages named pins (GC roots) of an on-disk store.
pub struct PinStore<'a> {
    store: &'a FsBlockstore,
}

impl<'a> PinStore<'a> {
    /// Create a new PinStore for the given store.
    pub(crate) fn new(store: &'a FsBlockstore) -> Self {
        Self { store }
    }

    /// Get the path to a pin file.
    fn pin_path(&self, name: &str) -> Result<PathBuf> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(Error::invalid_pin(format!(
                "Invalid pin name: {} (must not contain .. or path separators)",
                name
            )));
        }

        if name.is_empty() {
            return Err(Error::invalid_pin("Pin name cannot be empty"));
        }

        Ok(self.store.root().join("pins").join(name))
    }

    /// Add or update a pin.
    ///
    /// Appends the cid to the pin file (one cid per line).
    /// The last valid line is the current value.
    pub fn add(&self, name: &str, cid: &Cid) -> Result<()> {
        let path = self.pin_path(name)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", cid.to_hex())?;

        tracing::debug!(name, %cid, "pinned");
        Ok(())
    }

    /// Get the current value of a pin.
    ///
    /// Returns the last non-empty, non-comment line that parses as a cid.
    ///
    /// # Errors
    /// Returns `InvalidPin` if the pin file exists but holds no valid cid
    /// (for example after a torn write), so it is never mistaken for "unpinned".
    pub fn get(&self, name: &str) -> Result<Option<Cid>> {
        let path = self.pin_path(name)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let last = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| Cid::from_hex(line).ok())
            .last();

        match last {
            Some(cid) => Ok(Some(cid)),
            None => Err(Error::invalid_pin(format!(
                "pin {} exists but holds no valid cid",
                name
            ))),
        }
    }

    /// List all pins as (name, cid) pairs, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, Cid)>> {
        let pins_dir = self.store.root().join("pins");
        let mut pins = Vec::new();

        if !pins_dir.exists() {
            return Ok(pins);
        }

        for entry in fs::read_dir(&pins_dir)? {
            let path = entry?.path();

            if path.is_file()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(cid) = self.get(name)?
            {
                pins.push((name.to_string(), cid));
            }
        }

        pins.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pins)
    }

    /// Remove a pin.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.pin_path(name)?;

        if !path.exists() {
            return Err(Error::pin_not_found(name));
        }

        fs::remove_file(&path)?;
        tracing::debug!(name, "unpinned");
        Ok(())
    }

    /// The current root set: the value of every pin.
    pub fn roots(&self) -> Result<PinRoots> {
        Ok(self.list()?.into_iter().map(|(_, cid)| cid).collect())
    }
}
