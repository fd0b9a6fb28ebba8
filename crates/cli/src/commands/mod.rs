//! CLI subcommands

pub mod configuration;
pub mod status;
pub mod thermal;
