pub mod client;
pub mod memo;
pub mod schema;
pub mod watcher;

pub use client::{KvClient, KvEndpoint};
pub use memo::HashMemo;
pub use schema::Schema;
pub use watcher::CommitWatcher;
