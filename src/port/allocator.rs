use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::probe::{PortProbe, TcpBindProbe};
use crate::config::{AllocatorConfig, PortRange};
use crate::error::{DynaportError, Result};
use crate::storage;

/// Builds the allocation key for an application instance.
pub fn allocation_key(app_id: &str, instance_id: &str) -> String {
    format!("{}:{}", app_id, instance_id)
}

/// Persisted port allocator.
///
/// Every mutation of the assignment table is written to disk before the
/// call returns. Reservations are kept in memory only.
pub struct PortAllocator {
    path: PathBuf,
    range: PortRange,
    reserved: BTreeSet<u16>,
    assignments: BTreeMap<String, u16>,
    probe: Box<dyn PortProbe>,
}

impl PortAllocator {
    /// Opens the assignment table at `path`.
    ///
    /// A missing or unreadable table starts empty.
    pub fn open(path: impl Into<PathBuf>, config: &AllocatorConfig) -> Result<Self> {
        config.port_range.validate()?;
        let path = path.into();
        let assignments: BTreeMap<String, u16> = storage::load_or_default(&path);
        debug!(
            path = %path.display(),
            assignments = assignments.len(),
            range = %config.port_range,
            "Port allocator opened"
        );

        Ok(Self {
            path,
            range: config.port_range,
            reserved: config.reserved_ports.iter().copied().collect(),
            assignments,
            probe: Box::new(TcpBindProbe::new(Duration::from_millis(
                config.probe_timeout_ms,
            ))),
        })
    }

    /// Replaces the availability probe.
    pub fn with_probe(mut self, probe: impl PortProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Returns true if `port` is not reserved and probes free.
    pub fn is_available(&self, port: u16) -> bool {
        !self.reserved.contains(&port) && self.probe.is_free(port)
    }

    /// Finds a free port without claiming it.
    ///
    /// Previously assigned ports are tried first, then every other port in
    /// the range in random order.
    pub fn find_available(&self) -> Result<u16> {
        self.search(None)
    }

    /// Assigns a port to `key` and persists the table.
    ///
    /// The key keeps its current port while that port is still free. A
    /// `preferred` port is honoured when it is in range, not held by another
    /// key and free.
    pub fn allocate(&mut self, key: &str, preferred: Option<u16>) -> Result<u16> {
        if let Some(&current) = self.assignments.get(key) {
            if self.is_available(current) {
                self.persist()?;
                debug!(key = %key, port = current, "Reusing assigned port");
                return Ok(current);
            }
            debug!(key = %key, port = current, "Assigned port is busy, reallocating");
        }

        let preferred = preferred.filter(|&port| {
            self.range.contains(port) && !self.held_by_other(port, key) && self.is_available(port)
        });

        let port = match preferred {
            Some(port) => port,
            None => self.search(Some(key))?,
        };

        self.assignments.insert(key.to_string(), port);
        self.persist()?;
        info!(key = %key, port, "Port allocated");
        Ok(port)
    }

    /// Drops the assignment for `key`, returning the port it held.
    pub fn release(&mut self, key: &str) -> Result<Option<u16>> {
        let released = self.assignments.remove(key);
        if let Some(port) = released {
            self.persist()?;
            info!(key = %key, port, "Port released");
        }
        Ok(released)
    }

    pub fn get_assigned(&self, key: &str) -> Option<u16> {
        self.assignments.get(key).copied()
    }

    /// Snapshot of the assignment table.
    pub fn all(&self) -> BTreeMap<String, u16> {
        self.assignments.clone()
    }

    pub fn reserve(&mut self, port: u16) {
        self.reserved.insert(port);
    }

    pub fn unreserve(&mut self, port: u16) {
        self.reserved.remove(&port);
    }

    pub fn reserved(&self) -> &BTreeSet<u16> {
        &self.reserved
    }

    fn held_by_other(&self, port: u16, key: &str) -> bool {
        self.assignments
            .iter()
            .any(|(holder, &held)| held == port && holder != key)
    }

    fn search(&self, owner: Option<&str>) -> Result<u16> {
        let used: BTreeSet<u16> = self.assignments.values().copied().collect();

        for &port in used.iter().filter(|&&port| self.range.contains(port)) {
            if let Some(owner) = owner {
                if self.held_by_other(port, owner) {
                    continue;
                }
            }
            if self.is_available(port) {
                return Ok(port);
            }
        }

        let mut fresh: Vec<u16> = self
            .range
            .ports()
            .filter(|port| !self.reserved.contains(port) && !used.contains(port))
            .collect();
        fresh.shuffle(&mut rand::thread_rng());

        fresh
            .into_iter()
            .find(|&port| self.probe.is_free(port))
            .ok_or(DynaportError::PortsExhausted {
                min: self.range.min,
                max: self.range.max,
            })
    }

    fn persist(&self) -> Result<()> {
        storage::save(&self.path, &self.assignments)
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("path", &self.path)
            .field("range", &self.range)
            .field("reserved", &self.reserved)
            .field("assignments", &self.assignments)
            .finish_non_exhaustive()
    }
}
