pub mod dispatch;
pub mod hub;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod statics;
pub mod watcher;

pub use hub::{SubscriberHub, SubscriberId};
pub use registry::{ClientKey, ConnectionId, ConnectionRegistry};
pub use server::{start, AppState, ServerHandle};
pub use watcher::{ChangeWatcher, WatcherConfig, WatcherHandle};
