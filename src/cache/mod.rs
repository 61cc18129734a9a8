//! Installation cache for unpacked gems
//!
//! Maps a gem artifact to the result of a previous `gem install` of it.
//! Keys are the SHA-256 of the artifact contents, so two artifacts with the
//! same bytes share one entry no matter where they were found.
//!
//! # Concurrency
//!
//! The cache directory is shared by every staging job on the host. Entries
//! are published by copying into a private temp directory and renaming it
//! into place; the loser of a publish race discards its copy and uses the
//! winner's entry. Entries are never mutated after publishing and never
//! evicted.

pub mod store;

pub use store::{CacheEntryInfo, CacheKey, DirectoryCache, InstallationCache};
