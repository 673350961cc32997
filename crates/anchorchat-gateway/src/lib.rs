//! Change feed: committed store writes, from any process sharing the
//! database file, fanned out to in-process subscribers and WebSocket clients.

pub mod connection;
pub mod dispatcher;
pub mod tail;

pub use dispatcher::{Dispatcher, FeedFilter, Subscription};
pub use tail::{FeedTail, run_feed_loop};
