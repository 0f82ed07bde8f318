//! Write-through cache storage.
//!
//! Every resource key owns two co-located records: the content bytes under the
//! URL itself and the mimetype under [`mimetype_key`]. Both are refreshed
//! together so neither outlives the other.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{mimetype_key, CacheStore};
