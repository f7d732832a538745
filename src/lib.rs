pub mod betting;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod scoring;

#[cfg(test)]
mod testutil;

pub use engine::{RaceEngine, RaceReport};
pub use error::EngineError;
