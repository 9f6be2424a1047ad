pub mod apps;
pub mod chain_commands;
pub mod config;
pub mod graph;
pub mod host;
pub mod intent;
pub mod logger;
pub mod metadata;
pub mod plugins;
pub mod schema;
pub mod stack;
pub mod surface;
pub mod translate;
