pub mod store;

pub use store::SqliteContentIndex;
