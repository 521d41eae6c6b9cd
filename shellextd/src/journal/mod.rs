pub mod store;

pub use store::{JournalError, JournalStore, ListingStats, ShareStateRecord};
