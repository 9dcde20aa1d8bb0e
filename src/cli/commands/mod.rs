//! CLI command implementations

pub mod analyze;
pub mod budget;
pub mod completions;
pub mod convert;
pub mod gb;
pub mod init;
pub mod inst;
pub mod new;
pub mod risk;
