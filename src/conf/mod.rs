mod config;
mod endpoint;
mod engine;
mod table;

pub use config::Config;
pub use endpoint::{
    DestinationConfig, FileLedgerConfig, LedgerConfig, LocalDestinationConfig,
    S3DestinationConfig, SourceConfig, SqliteSourceConfig,
};
pub use engine::EngineConfig;
pub use table::{BatchFormat, LoadType, TableLoadSpec};
