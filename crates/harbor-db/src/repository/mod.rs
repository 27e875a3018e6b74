//! # Repositories
//!
//! Storage access grouped by table.
//!
//! | Repository        | Table           | Purpose                          |
//! |-------------------|-----------------|----------------------------------|
//! | `LocalCacheStore` | `cache_entries` | Buffered mutations awaiting sync |
//! | `ReadCache`       | `read_cache`    | Time-to-live cached reads        |

pub mod cache;
pub mod read_cache;
