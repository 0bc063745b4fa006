pub mod batch;
pub mod cli;
pub mod creator;
pub mod elasticsearch;
pub mod load_config;

pub use cli::{run, Cli, Commands};
