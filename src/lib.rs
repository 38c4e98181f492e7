pub mod app;
pub mod audio;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod jobs;
pub mod model;
pub mod player;
pub mod queue;

pub use error::{ClientError, Result};
