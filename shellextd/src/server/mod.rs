//! Local query server for shell extensions.
//!
//! A connection carries exactly one request and one reply:
//! [`IpcListener`] reads and decodes, [`RequestRouter`] answers from the
//! journal through [`ShareStateCache`] or defers to the
//! [`FetchCoordinator`], and every failure collapses to the empty reply.

pub mod error;
pub mod fetch;
pub mod listener;
pub mod router;
pub mod share_cache;
pub mod thumbnail;

pub use error::QueryError;
pub use fetch::{CollectionKey, FetchCoordinator, FetchOutcome};
pub use listener::{IpcListener, ListenerError};
pub use router::RequestRouter;
pub use share_cache::{DEFAULT_SHARE_TTL, ShareStateCache};
