use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::evaluate::{EvalMetric, evaluate_all_clusters};

#[derive(Parser, Debug, Clone)]
pub struct EvaluateCommand {
    /// 目标来源编号，即文件名中第一个 `.` 之后的部分
    pub source_id: String,
    /// 包含各个簇目录的根目录
    pub root: PathBuf,
    /// 参与统计的文件后缀，区分大小写
    #[arg(long, default_value = ".png")]
    pub ext: String,
    /// 用于挑选最佳簇的指标
    #[arg(short, long, value_enum, default_value_t = EvalMetric::F1)]
    pub metric: EvalMetric,
    /// 将结果保存为 JSON 文件
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for EvaluateCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let report = evaluate_all_clusters(&self.source_id, &self.root, &self.ext, self.metric, self.output.as_deref())?;
        println!("{}", report.to_json()?);
        Ok(())
    }
}
