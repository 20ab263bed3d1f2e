//! 聚类算法接口
//!
//! 输入为对称非负的距离矩阵（不是相似度矩阵），输出每个碎片的标签，
//! `-1` 表示未归类（噪声），其余为 `0..k` 的簇编号。

use std::collections::VecDeque;
use std::path::Path;

use log::info;
use ndarray::{Array2, ArrayView2};

use crate::error::{Error, IoContext, Result};

/// 噪声标签
pub const NOISE: i32 = -1;

/// 基于预计算距离矩阵的聚类算法
pub trait Clusterer {
    fn fit_predict(&self, distances: ArrayView2<f64>) -> Result<Vec<i32>>;
}

/// 使用预计算距离矩阵的 DBSCAN
///
/// 邻域包含点自身，邻域大小不少于 `min_samples` 的点为核心点
#[derive(Debug, Clone)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn region_query(&self, distances: ArrayView2<f64>, point: usize) -> Vec<usize> {
        distances
            .row(point)
            .iter()
            .enumerate()
            .filter(|&(idx, &d)| idx == point || d <= self.eps)
            .map(|(idx, _)| idx)
            .collect()
    }
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl Clusterer for Dbscan {
    fn fit_predict(&self, distances: ArrayView2<f64>) -> Result<Vec<i32>> {
        let (n, m) = distances.dim();
        if n != m {
            return Err(Error::config(format!("距离矩阵必须是方阵，实际为 {}x{}", n, m)));
        }
        if !(self.eps > 0.) {
            return Err(Error::config(format!("eps 必须为正数，实际为 {}", self.eps)));
        }
        if self.min_samples == 0 {
            return Err(Error::config("min_samples 不能小于 1"));
        }

        let neighbors = (0..n).map(|i| self.region_query(distances, i)).collect::<Vec<_>>();
        let is_core = neighbors.iter().map(|nb| nb.len() >= self.min_samples).collect::<Vec<_>>();

        let mut labels = vec![NOISE; n];
        let mut cluster = 0;
        for start in 0..n {
            if labels[start] != NOISE || !is_core[start] {
                continue;
            }
            labels[start] = cluster;
            let mut queue = VecDeque::from([start]);
            while let Some(point) = queue.pop_front() {
                if !is_core[point] {
                    continue;
                }
                for &nb in &neighbors[point] {
                    if labels[nb] == NOISE {
                        labels[nb] = cluster;
                        queue.push_back(nb);
                    }
                }
            }
            cluster += 1;
        }

        info!(
            "DBSCAN 得到 {} 个簇，{} 个噪声点",
            cluster,
            labels.iter().filter(|&&l| l == NOISE).count()
        );
        Ok(labels)
    }
}

/// 将相似度矩阵转换为距离矩阵：`max(ceiling - s, 0)`，对角线为 0
///
/// `ceiling` 为相同碎片的相似度，SSIM 为 1，直方图为 0.75
pub fn similarity_to_distance(similarity: &Array2<f64>, ceiling: f64) -> Array2<f64> {
    let mut distance = similarity.mapv(|s| (ceiling - s).max(0.));
    distance.diag_mut().fill(0.);
    distance
}

/// 读取外部聚类程序输出的 JSON 标签数组
pub fn load_labels(path: &Path) -> Result<Vec<i32>> {
    let data = std::fs::read(path).with_path(path)?;
    let labels: Vec<i32> = serde_json::from_slice(&data)?;
    if let Some(bad) = labels.iter().find(|&&l| l < NOISE) {
        return Err(Error::config(format!("无效的标签 {}（{}）", bad, path.display())));
    }
    Ok(labels)
}
