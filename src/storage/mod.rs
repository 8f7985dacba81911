mod episode_files;
mod feeds;
mod schema;
mod subscribers;
mod types;

pub use schema::Database;
pub use subscribers::{parse_subscriber_list, SubscriberLineError};
pub use types::{DatabaseError, EpisodeFile, FeedRecord, NewEpisodeFile, Subscriber};
