pub mod archiver;
pub mod checksum;
pub mod config;
pub mod deflate;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod zip;

#[cfg(test)]
pub(crate) mod testutil;

pub use archiver::{pack, pack_with_progress, EntryReport, Summary};
pub use config::PackConfig;
pub use error::{Error, Result};
