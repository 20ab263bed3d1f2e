mod cluster;
mod evaluate;
mod matrix;
mod restore;

pub use cluster::*;
pub use evaluate::*;
pub use matrix::*;
pub use restore::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
