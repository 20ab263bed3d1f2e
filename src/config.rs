use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use opencv::imgproc::{self, InterpolationFlags};

use crate::cli::*;
use crate::distance::{self, Combine, VectorMetric};
use crate::error::Error;
use crate::histogram;

#[derive(Parser, Debug, Clone)]
pub struct DatasetOptions {
    /// 碎片图片后缀名，多个后缀用逗号分隔，忽略大小写
    #[arg(short, long, default_value = "png")]
    pub ext: String,
    /// 不裁剪工作区域，直接使用整张图片
    #[arg(long)]
    pub no_crop: bool,
    /// 工作区域提取阈值，灰度（或 alpha）大于该值的像素视为前景
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    pub threshold: i32,
    /// 去噪前转换颜色空间：hsv, lab, ycrcb, rgb
    #[arg(long, value_name = "SPACE", value_parser = parse_color)]
    pub color: Option<i32>,
    /// 亮度去噪强度
    #[arg(long = "denoise-h", value_name = "H", default_value_t = 3.)]
    pub h: f32,
    /// 颜色去噪强度
    #[arg(long = "denoise-h-color", value_name = "H", default_value_t = 3.)]
    pub h_color: f32,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self { ext: "png".to_string(), no_crop: false, threshold: 0, color: None, h: 3., h_color: 3. }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureOptions {
    /// 距离矩阵类型
    #[arg(short, long, value_enum, default_value_t = MatrixKind::Histogram)]
    pub kind: MatrixKind,
    /// 参考图片，每对碎片的距离会与各自到参考图的距离加权混合
    #[arg(short, long, value_name = "IMAGE")]
    pub reference: Option<PathBuf>,
    /// 统一尺寸时使用的插值方式
    #[arg(long, value_name = "FLAG", default_value = "linear", value_parser = parse_interpolation)]
    pub interpolation: InterpolationFlags,
    /// 梯度距离的合并方式：mean 或 median
    #[arg(long, default_value = "mean")]
    pub combine: Combine,
    /// 梯度向量之间的距离度量
    #[arg(long, default_value = "euclidean")]
    pub metric: VectorMetric,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            kind: MatrixKind::Histogram,
            reference: None,
            interpolation: InterpolationFlags::INTER_LINEAR,
            combine: Combine::Mean,
            metric: VectorMetric::Euclidean,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "shardcluster", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 计算线程数量
    #[arg(short = 'j', long, global = true, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算碎片之间的距离矩阵并保存为 npy
    Matrix(MatrixCommand),
    /// 计算距离矩阵、聚类并按簇复制碎片
    Cluster(ClusterCommand),
    /// 使用文件名中的真实来源评估聚类结果
    Evaluate(EvaluateCommand),
    /// 将一个目录中的所有文件移动到另一个目录
    Restore(RestoreCommand),
}

/// 距离矩阵的种类
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// 颜色直方图距离
    Histogram,
    /// 灰度 SSIM 相似度
    Ssim,
    /// HSV 三通道平均 SSIM 相似度
    SsimHsv,
    /// 梯度场距离
    Gradient,
}

impl MatrixKind {
    /// 直方图和 SSIM 矩阵保存的是相似度，越大越相似
    pub fn is_similarity(self) -> bool {
        self.similarity_ceiling(false).is_some()
    }

    /// 相似度矩阵能取到的最大值（相同碎片的得分），距离矩阵返回 `None`
    ///
    /// 直方图混合参考图后，上限为三个相同得分按 0.25/0.5/0.5 加权的结果
    pub fn similarity_ceiling(self, with_reference: bool) -> Option<f64> {
        match self {
            Self::Histogram if with_reference => Some(distance::blend_with_reference(
                histogram::SELF_SIMILARITY,
                histogram::SELF_SIMILARITY,
                histogram::SELF_SIMILARITY,
            )),
            Self::Histogram => Some(histogram::SELF_SIMILARITY),
            Self::Ssim | Self::SsimHsv => Some(1.),
            Self::Gradient => None,
        }
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Histogram => "histogram",
            Self::Ssim => "ssim",
            Self::SsimHsv => "ssim-hsv",
            Self::Gradient => "gradient",
        };
        f.write_str(name)
    }
}

pub fn parse_interpolation(s: &str) -> Result<InterpolationFlags, String> {
    match s {
        "nearest" => Ok(InterpolationFlags::INTER_NEAREST),
        "linear" => Ok(InterpolationFlags::INTER_LINEAR),
        "cubic" => Ok(InterpolationFlags::INTER_CUBIC),
        "area" => Ok(InterpolationFlags::INTER_AREA),
        "lanczos4" => Ok(InterpolationFlags::INTER_LANCZOS4),
        _ => Err(format!("无效的插值方式: {}", s)),
    }
}

/// 颜色空间名称转换为 OpenCV 的 BGR 转换代码
pub fn parse_color(s: &str) -> Result<i32, String> {
    match s.to_ascii_lowercase().as_str() {
        "hsv" => Ok(imgproc::COLOR_BGR2HSV),
        "lab" => Ok(imgproc::COLOR_BGR2Lab),
        "ycrcb" => Ok(imgproc::COLOR_BGR2YCrCb),
        "rgb" => Ok(imgproc::COLOR_BGR2RGB),
        "hls" => Ok(imgproc::COLOR_BGR2HLS),
        _ => Err(format!("无效的颜色空间: {}", s)),
    }
}

impl FromStr for MatrixKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| Error::config(format!("无效的矩阵类型: {}", s)))
    }
}
