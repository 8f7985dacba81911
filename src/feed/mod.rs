//! Feed access: fetching, parsing and episode extraction.
//!
//! - [`source`] - the [`FeedSource`] contract and its HTTP implementation
//!   (conditional requests, retry with backoff, size limits)
//! - [`parser`] - RSS/Atom bytes into typed [`RawEntry`] values via `feed-rs`
//! - [`extract`] - [`Extractor`] turning raw entries into [`Episode`]s
//! - [`list`] - plain-text feed lists used for registration
//!
//! # Example
//!
//! ```ignore
//! use podwatch::feed::{FeedSource, HttpFeedSource, Extractor};
//!
//! let source = HttpFeedSource::new(reqwest::Client::new());
//! let fetched = source.fetch("https://example.com/podcast.rss", None).await?;
//! let extractor = Extractor::default();
//! for entry in &fetched.entries {
//!     let episode = extractor.extract(1, entry)?;
//! }
//! ```

pub mod extract;
pub mod list;
pub mod parser;
pub mod source;

pub use extract::{Episode, ExtractionError, Extractor};
pub use list::{parse_feed_list, FeedListError};
pub use parser::{parse_feed, ParsedFeed, RawEntry};
pub use source::{FeedSource, FetchError, FetchedFeed, HttpFeedSource};
