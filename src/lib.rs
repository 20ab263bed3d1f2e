pub mod cli;
pub mod cluster;
pub mod config;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod evaluate;
pub mod gradient;
pub mod histogram;
pub mod materialize;
pub mod region;
pub mod ssim;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
