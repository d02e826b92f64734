//! Utility modules

pub mod memory_billing;
pub mod memory_feed;
pub mod memory_storage;
pub mod money;
pub mod validation;

pub use memory_billing::*;
pub use memory_feed::*;
pub use memory_storage::*;
pub use money::*;
pub use validation::*;
