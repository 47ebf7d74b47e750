#![forbid(unsafe_code)]

pub mod canonical;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod novelty;
pub mod reconcile;
pub mod seen_store;
pub mod session;
pub mod view;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
