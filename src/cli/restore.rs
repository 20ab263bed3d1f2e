use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::dataset::restore_files;

#[derive(Parser, Debug, Clone)]
pub struct RestoreCommand {
    /// 源目录
    pub in_dir: PathBuf,
    /// 目标目录，不存在时自动创建
    pub out_dir: PathBuf,
}

impl SubCommandExtend for RestoreCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;
        let moved = restore_files(&self.in_dir, &self.out_dir)?;
        info!("已将 {} 个文件移动到 {}", moved, self.out_dir.display());
        Ok(())
    }
}
