pub mod collection;
pub mod config;
mod mapped;
pub mod partitioned_mutex;
mod scheduler;
pub mod test_collection;

// Re-export types

pub use collection::*;
pub use config::*;
pub use mapped::*;
pub use scheduler::*;
