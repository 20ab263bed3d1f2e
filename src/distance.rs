//! 碎片两两之间的距离矩阵
//!
//! 三种引擎（颜色直方图、SSIM、梯度场）共用 [`pairwise_matrix`]：
//! 只计算 `i < j` 的格子并对称写入，对角线保持初始值。
//! 直方图与 SSIM 的结果本质上是相似度，只保证对称和非负，不保证三角不等式。

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::debug;
use ndarray::{Array2, ArrayD, ArrayView1};
use opencv::core::Mat;
use opencv::imgproc::{self, InterpolationFlags};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::gradient::GradientComponents;
use crate::histogram;
use crate::ssim;
use crate::utils;

/// 两个特征之间的标量度量
pub trait PairwiseMeasure: Sync {
    type Feature: Sync;

    /// 对角线（自身）的初始值
    const DIAGONAL: f64 = 0.;

    fn measure(&self, a: &Self::Feature, b: &Self::Feature) -> Result<f64>;
}

/// 与参考图的加权混合：`0.25 * d_ij + 0.5 * d_i_ref + 0.5 * d_j_ref`
pub fn blend_with_reference(d_ij: f64, d_i_ref: f64, d_j_ref: f64) -> f64 {
    d_ij * 0.25 + d_i_ref * 0.5 + d_j_ref * 0.5
}

/// 计算对称的 N x N 矩阵
///
/// 每一行 `i` 由一个 rayon 任务负责 `(i, j > i)` 的格子。
/// 提供参考特征时，每个碎片到参考的距离只计算一次。
pub fn pairwise_matrix<M: PairwiseMeasure>(
    measure: &M,
    features: &[M::Feature],
    reference: Option<&M::Feature>,
    pb: &ProgressBar,
) -> Result<Array2<f64>> {
    let n = features.len();
    let to_reference = reference
        .map(|r| features.par_iter().map(|f| measure.measure(f, r)).collect::<Result<Vec<_>>>())
        .transpose()?;

    pb.set_length(n as u64);
    let rows = (0..n)
        .into_par_iter()
        .progress_with(pb.clone())
        .map(|i| {
            (i + 1..n)
                .map(|j| {
                    let d = measure.measure(&features[i], &features[j])?;
                    Ok(match &to_reference {
                        Some(r) => blend_with_reference(d, r[i], r[j]),
                        None => d,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish();

    let mut matrix = Array2::from_elem((n, n), M::DIAGONAL);
    for (i, row) in rows.into_iter().enumerate() {
        for (j, d) in (i + 1..n).zip(row) {
            matrix[[i, j]] = d;
            matrix[[j, i]] = d;
        }
    }
    debug!("矩阵计算完成: {}x{}", n, n);
    Ok(matrix)
}

/// 颜色直方图组合得分，越大越相似
#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramMeasure;

impl PairwiseMeasure for HistogramMeasure {
    type Feature = ArrayD<f32>;

    fn measure(&self, a: &Self::Feature, b: &Self::Feature) -> Result<f64> {
        if a.len() != b.len() {
            return Err(Error::config(format!("直方图长度不一致: {} vs {}", a.len(), b.len())));
        }
        match (a.as_slice(), b.as_slice()) {
            (Some(a), Some(b)) => histogram::histogram_similarity(a, b),
            _ => Err(Error::config("直方图内存不连续")),
        }
    }
}

/// 直方图组合得分矩阵，对角线为 0；值越大越相似，聚类前按 [`histogram::SELF_SIMILARITY`] 换算成距离
pub fn histogram_distance_matrix(
    histograms: &[ArrayD<f32>],
    reference: Option<&ArrayD<f32>>,
    pb: &ProgressBar,
) -> Result<Array2<f64>> {
    pairwise_matrix(&HistogramMeasure, histograms, reference, pb)
}

/// SSIM 的计算方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsimVariant {
    /// 灰度图
    Gray,
    /// H、S、V 三个通道分别计算后取平均
    Hsv,
}

/// SSIM 相似度，对角线为 1
#[derive(Debug, Default, Clone, Copy)]
pub struct SsimMeasure;

impl PairwiseMeasure for SsimMeasure {
    type Feature = Vec<Array2<f64>>;

    const DIAGONAL: f64 = 1.;

    fn measure(&self, a: &Self::Feature, b: &Self::Feature) -> Result<f64> {
        ssim::ssim_channels(a, b)
    }
}

/// 将图片转换为 SSIM 所需的各通道浮点矩阵
///
/// 尺寸不一致时先统一缩放到这批图片的最大宽高
pub fn ssim_features(
    images: &[&Mat],
    variant: SsimVariant,
    interpolation: InterpolationFlags,
) -> Result<Vec<Vec<Array2<f64>>>> {
    let Some((width, height)) = utils::max_size(images.iter().copied()) else {
        return Ok(vec![]);
    };
    images
        .iter()
        .map(|image| {
            let image = utils::resize(&utils::to_bgr(image)?, width, height, interpolation)?;
            let channels = match variant {
                SsimVariant::Gray => vec![utils::cvt_color(&image, imgproc::COLOR_BGR2GRAY)?],
                SsimVariant::Hsv => utils::split(&utils::cvt_color(&image, imgproc::COLOR_BGR2HSV)?)?,
            };
            channels.iter().map(utils::mat_to_array).collect()
        })
        .collect()
}

/// SSIM 相似度矩阵，越大越相似
pub fn ssim_matrix(
    images: &[&Mat],
    variant: SsimVariant,
    interpolation: InterpolationFlags,
    pb: &ProgressBar,
) -> Result<Array2<f64>> {
    let features = ssim_features(images, variant, interpolation)?;
    pairwise_matrix(&SsimMeasure, &features, None, pb)
}

/// 梯度距离的四个分量的合并方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Mean,
    Median,
}

impl Combine {
    pub fn apply(self, values: [f64; 4]) -> f64 {
        match self {
            Self::Mean => values.iter().sum::<f64>() / 4.,
            Self::Median => {
                let mut sorted = values;
                sorted.sort_by(f64::total_cmp);
                (sorted[1] + sorted[2]) / 2.
            }
        }
    }
}

impl FromStr for Combine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            _ => Err(Error::config(format!("合并方式只能是 mean 或 median，实际为 {:?}", s))),
        }
    }
}

/// 两个向量之间的距离度量
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
    Euclidean,
    #[value(name = "sqeuclidean")]
    SqEuclidean,
    Manhattan,
    Chebyshev,
    /// `1 - cos`，零向量的余弦相似度记为 0
    Cosine,
}

impl VectorMetric {
    pub fn distance(self, a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
        let pairs = a.iter().zip(b.iter()).map(|(&x, &y)| (x as f64, y as f64));
        match self {
            Self::Euclidean => Self::SqEuclidean.distance(a, b).sqrt(),
            Self::SqEuclidean => pairs.map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
            Self::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0., f64::max),
            Self::Cosine => {
                let (mut dot, mut na, mut nb) = (0., 0., 0.);
                for (x, y) in pairs {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                let denom = na.sqrt() * nb.sqrt();
                let similarity = if denom != 0. { dot / denom } else { 0. };
                (1. - similarity).clamp(0., 2.)
            }
        }
    }
}

impl FromStr for VectorMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| Error::config(format!("无效的距离度量: {:?}", s)))
    }
}

impl fmt::Display for VectorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(v) => f.write_str(v.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}

/// 梯度场距离：四个分量分别计算距离后合并
#[derive(Debug, Clone, Copy)]
pub struct GradientMeasure {
    pub combine: Combine,
    pub metric: VectorMetric,
}

impl GradientMeasure {
    pub fn new(combine: Combine, metric: VectorMetric) -> Self {
        Self { combine, metric }
    }

    /// 由字符串配置构建，未知的名称返回配置错误
    pub fn from_names(combine: &str, metric: &str) -> Result<Self> {
        Ok(Self::new(combine.parse()?, metric.parse()?))
    }

    pub fn components_distance(&self, a: &GradientComponents, b: &GradientComponents) -> f64 {
        let m = self.metric;
        self.combine.apply([
            m.distance(a.gx, b.gx),
            m.distance(a.gy, b.gy),
            m.distance(a.gx_gray, b.gx_gray),
            m.distance(a.gy_gray, b.gy_gray),
        ])
    }
}

impl Default for GradientMeasure {
    fn default() -> Self {
        Self::new(Combine::Mean, VectorMetric::Euclidean)
    }
}

impl PairwiseMeasure for GradientMeasure {
    type Feature = ArrayD<f32>;

    fn measure(&self, a: &Self::Feature, b: &Self::Feature) -> Result<f64> {
        if a.len() != b.len() {
            return Err(Error::config(format!("梯度场长度不一致: {} vs {}", a.len(), b.len())));
        }
        let (a, b) = (GradientComponents::from_field(a)?, GradientComponents::from_field(b)?);
        Ok(self.components_distance(&a, &b))
    }
}

pub fn gradient_distance_matrix(
    fields: &[ArrayD<f32>],
    reference: Option<&ArrayD<f32>>,
    measure: GradientMeasure,
    pb: &ProgressBar,
) -> Result<Array2<f64>> {
    pairwise_matrix(&measure, fields, reference, pb)
}
