//! Backend implementations of both persistence paths
//!
//! - `memory`: in-process rows, optionally capacity-limited
//! - `test`: memory store with failure injection
//! - `file`: JSON-lines append log

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use test::TestStore;
