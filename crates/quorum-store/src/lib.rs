pub mod day_store;
pub mod error;
pub mod long_term;
pub mod memory;
pub mod reader;
pub mod sqlite;

pub use day_store::{read_state, read_timeline, DayStore};
pub use error::StoreError;
pub use long_term::{MemoryBackend, SqliteMemoryBackend};
pub use reader::MetricReader;
pub use sqlite::{MetricDb, MetricRow};
