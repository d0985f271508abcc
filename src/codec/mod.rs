//! Save and diff codecs: harvesting edited state for persistence and
//! network replay.

pub mod diff;
pub mod disk_io;
pub mod rle;
pub mod save;

pub use diff::{DiffQueues, MaterialDiff, ValueDiff};
pub use disk_io::{decode_save, encode_save, load_world, save_world};
pub use save::{ChunkSave, WorldSave};
