pub mod state;
pub mod store;

pub use state::{Checkpoint, ProjectState};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
