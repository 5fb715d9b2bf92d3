pub mod config;
pub mod credentials;
pub mod options;
pub mod paths;
pub mod store;

pub use config::{Config, EnrichmentConfig, FeedConfig, ImportConfig, SchedulerConfig, TmdbConfig, default_scheduler_config};
pub use credentials::CredentialStore;
pub use options::OptionStore;
pub use paths::PathManager;
pub use store::{CacheDirKvStore, FileKvStore, KvStore, KvStoreExt, MemoryKvStore, StateStore, StoreError};
