//! Persistence: binary snapshot and append-only file.

mod aof;
mod snapshot;

pub use aof::{AofReader, AofService, AofWriter};
pub use snapshot::{
    load_if_present, SnapshotLoadResult, SnapshotLoader, SnapshotSaveResult, SnapshotSaver,
};
