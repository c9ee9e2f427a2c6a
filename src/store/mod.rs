pub mod queue;
pub mod sqlite;

pub use sqlite::Store;
