use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::Array2;
use ndarray_npy::write_npy;
use opencv::core::Mat;

use crate::cli::SubCommandExtend;
use crate::config::{DatasetOptions, FeatureOptions, MatrixKind, Opts};
use crate::dataset::{self, Fragment};
use crate::distance::{self, GradientMeasure, SsimVariant};
use crate::gradient::{self, SobelGradient};
use crate::histogram;
use crate::region::ThresholdRegion;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct MatrixCommand {
    #[command(flatten)]
    pub dataset: DatasetOptions,
    #[command(flatten)]
    pub features: FeatureOptions,
    /// 碎片图片所在目录
    pub dir: PathBuf,
    /// 矩阵输出路径，碎片路径列表保存在同名的 .json 文件中
    #[arg(short, long, value_name = "FILE", default_value = "distances.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for MatrixCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let (fragments, reference) = load_inputs(&self.dir, &self.dataset, &self.features)?;
        let images = fragments.iter().map(|f| &f.image).collect::<Vec<_>>();
        let matrix = compute_matrix(&images, reference.as_ref(), &self.features, &utils::progress_bar(0, "计算矩阵"))?;

        write_npy(&self.output, &matrix)?;
        let listing = self.output.with_extension("json");
        let paths = fragments.iter().map(|f| f.path.to_string_lossy()).collect::<Vec<_>>();
        fs::write(&listing, serde_json::to_string_pretty(&paths)?)?;

        info!("{} 矩阵已保存到 {}，路径列表 {}", self.features.kind, self.output.display(), listing.display());
        Ok(())
    }
}

/// 读取目录中的碎片，以及可选的参考图（参考图使用相同的预处理）
pub fn load_inputs(
    dir: &Path,
    dataset: &DatasetOptions,
    features: &FeatureOptions,
) -> crate::Result<(Vec<Fragment>, Option<Mat>)> {
    let fragments = dataset::build_dataset(dir, dataset, &ThresholdRegion, &utils::progress_bar(0, "读取图片"))?;
    let reference = features
        .reference
        .as_ref()
        .map(|path| dataset::load_fragment(path, dataset, &ThresholdRegion))
        .transpose()?;
    Ok((fragments, reference))
}

/// 按 `features.kind` 计算矩阵，SSIM 返回相似度，其余返回距离
pub fn compute_matrix(
    images: &[&Mat],
    reference: Option<&Mat>,
    features: &FeatureOptions,
    pb: &ProgressBar,
) -> crate::Result<Array2<f64>> {
    match features.kind {
        MatrixKind::Histogram => {
            let set = histogram::compute_histograms(images, reference, true, pb)?;
            pb.reset();
            distance::histogram_distance_matrix(&set.items, set.reference.as_ref(), pb)
        }
        MatrixKind::Ssim | MatrixKind::SsimHsv => {
            if reference.is_some() {
                warn!("{} 不使用参考图", features.kind);
            }
            let variant = match features.kind {
                MatrixKind::Ssim => SsimVariant::Gray,
                _ => SsimVariant::Hsv,
            };
            distance::ssim_matrix(images, variant, features.interpolation, pb)
        }
        MatrixKind::Gradient => {
            let set =
                gradient::compute_gradients(images, reference, features.interpolation, &SobelGradient, true, pb)?;
            pb.reset();
            let measure = GradientMeasure::new(features.combine, features.metric);
            distance::gradient_distance_matrix(&set.items, set.reference.as_ref(), measure, pb)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::utils::testing::*;

    #[rstest]
    #[case(MatrixKind::Histogram, 0.)]
    #[case(MatrixKind::Ssim, 1.)]
    #[case(MatrixKind::SsimHsv, 1.)]
    #[case(MatrixKind::Gradient, 0.)]
    fn every_kind_is_symmetric(#[case] kind: MatrixKind, #[case] diagonal: f64) {
        let a = pattern(16, 16, |r, c| [(r * 15) as u8, (c * 15) as u8, 80]);
        let b = pattern(16, 16, |r, c| [(c * 15) as u8, 40, (r * 15) as u8]);
        let c = solid(12, 20, [10, 200, 30]);
        let images = [&a, &b, &c];
        let features = FeatureOptions { kind, ..Default::default() };

        let m = compute_matrix(&images, None, &features, &ProgressBar::hidden()).unwrap();
        assert_eq!(m.dim(), (3, 3));
        for i in 0..3 {
            assert_eq!(m[[i, i]], diagonal);
            for j in 0..3 {
                assert_eq!(m[[i, j]], m[[j, i]]);
                assert!(m[[i, j]].is_finite());
            }
        }
    }

    #[test]
    fn reference_changes_histogram_matrix() {
        let a = pattern(8, 8, |r, _| [(r * 30) as u8, 0, 0]);
        let b = solid(8, 8, [0, 0, 255]);
        let reference = solid(8, 8, [255, 0, 0]);
        let images = [&a, &b];
        let features = FeatureOptions::default();

        let plain = compute_matrix(&images, None, &features, &ProgressBar::hidden()).unwrap();
        let blended = compute_matrix(&images, Some(&reference), &features, &ProgressBar::hidden()).unwrap();
        assert_eq!(plain[[0, 0]], 0.);
        assert_eq!(blended[[0, 0]], 0.);
        assert_ne!(plain[[0, 1]], blended[[0, 1]]);
    }
}
