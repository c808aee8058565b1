//! Port allocation.
//!
//! [`PortAllocator`] hands out ports from a configured range and remembers
//! which allocation key holds which port in a JSON table, so an application
//! restarted later gets its old port back whenever it is still free.

mod allocator;
mod probe;

pub use allocator::{allocation_key, PortAllocator};
pub use probe::{PortProbe, TcpBindProbe};
