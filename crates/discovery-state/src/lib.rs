//! Local bookkeeping for the discovery diff protocol: the durable
//! token/number-set store and the advisory undiscoverable cache.

mod diff_state;
mod error;
mod undiscoverable;

pub use diff_state::{DiffState, DiffStateStore};
pub use error::StateError;
pub use undiscoverable::{UndiscoverableCache, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
