#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "env_logger")]
mod log;

pub mod host;
pub mod program;
pub mod slot;
pub mod thread;

pub use slot::{SENTINEL_ADDR, force_release, initialize, probe};
