use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::{SubCommandExtend, compute_matrix, load_inputs};
use crate::cluster::{Clusterer, Dbscan, load_labels, similarity_to_distance};
use crate::config::{DatasetOptions, FeatureOptions, Opts};
use crate::dataset;
use crate::materialize::materialize_clusters;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct ClusterCommand {
    #[command(flatten)]
    pub dataset: DatasetOptions,
    #[command(flatten)]
    pub features: FeatureOptions,
    /// 碎片图片所在目录
    pub dir: PathBuf,
    /// 聚类结果输出目录，已存在时会被清空
    pub output: PathBuf,
    /// DBSCAN 邻域半径
    #[arg(long, default_value_t = 0.5)]
    pub eps: f64,
    /// 成为核心点所需的最少邻居数量（包括自身）
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub min_samples: usize,
    /// 使用外部聚类程序输出的标签（JSON 数组），不再计算矩阵
    #[arg(long, value_name = "FILE")]
    pub labels: Option<PathBuf>,
    /// 同时将矩阵保存为 npy
    #[arg(long, value_name = "FILE")]
    pub save_matrix: Option<PathBuf>,
}

impl SubCommandExtend for ClusterCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let (paths, labels) = match &self.labels {
            Some(file) => (dataset::list_fragments(&self.dir, &self.dataset.ext)?, load_labels(file)?),
            None => {
                let (fragments, reference) = load_inputs(&self.dir, &self.dataset, &self.features)?;
                let images = fragments.iter().map(|f| &f.image).collect::<Vec<_>>();
                let matrix =
                    compute_matrix(&images, reference.as_ref(), &self.features, &utils::progress_bar(0, "计算矩阵"))?;
                if let Some(path) = &self.save_matrix {
                    write_npy(path, &matrix)?;
                }
                let ceiling = self.features.kind.similarity_ceiling(reference.is_some());
                let distances = match ceiling {
                    Some(ceiling) => similarity_to_distance(&matrix, ceiling),
                    None => matrix,
                };
                let labels = Dbscan::new(self.eps, self.min_samples).fit_predict(distances.view())?;
                (fragments.into_iter().map(|f| f.path).collect(), labels)
            }
        };

        let counts = materialize_clusters(&paths, &labels, &self.output, &utils::progress_bar(0, "复制碎片"))?;
        for (name, count) in &counts {
            info!("{}: {}", name, count);
        }
        Ok(())
    }
}
