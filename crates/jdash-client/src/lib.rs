pub mod commands;
pub mod config;
pub mod connection;
pub mod facades;
pub mod heartbeat;
pub mod models;
pub mod poller;
pub mod registry;
pub mod session;
pub mod shared;
pub mod update;
pub mod watcher;

pub use commands::{CommandError, Commands, ConfigOption, ConfigValue, SharingAction};
pub use config::{ConfigError, ControllerRegistration, PollerOptions};
pub use connection::{Connection, ConnectError, LoginError, LoginMethod, RpcError};
pub use poller::{ControllerPoller, CycleReport, PollExit};
pub use registry::ConnectionRegistry;
pub use shared::StoreHandle;
pub use watcher::{start_model_watcher, ModelWatcherHandle, ModelWatchers, WatcherError, WatcherState};
