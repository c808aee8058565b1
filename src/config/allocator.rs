//! Port allocator configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DynaportError;

/// Inclusive range of ports the allocator may hand out.
///
/// Serialized as a two element list, `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    /// Lowest port (inclusive).
    pub min: u16,
    /// Highest port (inclusive).
    pub max: u16,
}

impl PortRange {
    /// Creates a range, rejecting port 0 and inverted bounds.
    pub fn new(min: u16, max: u16) -> Result<Self, DynaportError> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    /// Returns true if `port` lies within the range.
    pub fn contains(&self, port: u16) -> bool {
        self.min <= port && port <= self.max
    }

    /// Iterates over every port in the range.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.min..=self.max
    }

    pub(crate) fn validate(&self) -> Result<(), DynaportError> {
        if self.min == 0 {
            return Err(DynaportError::config(
                "port_allocator.port_range must not include port 0",
            ));
        }
        if self.min > self.max {
            return Err(DynaportError::config(format!(
                "port_allocator.port_range is inverted: {} > {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 8000,
            max: 9000,
        }
    }
}

impl From<(u16, u16)> for PortRange {
    fn from((min, max): (u16, u16)) -> Self {
        Self { min, max }
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(range: PortRange) -> Self {
        (range.min, range.max)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Port allocator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Range ports are allocated from.
    pub port_range: PortRange,

    /// Ports never handed out automatically.
    pub reserved_ports: Vec<u16>,

    /// Timeout in milliseconds for the connect that follows a successful
    /// bind.
    pub probe_timeout_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
            reserved_ports: Vec::new(),
            probe_timeout_ms: 500,
        }
    }
}
