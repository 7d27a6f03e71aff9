pub mod memory_remote;

pub use memory_remote::{FailureMode, InMemoryRemoteStore};
