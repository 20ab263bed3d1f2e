//! 颜色直方图特征
//!
//! 每张图片计算 3 通道联合直方图，每通道 8 个桶，范围 `[0, 256)`，
//! 然后独立地做 min-max 归一化到 `[0, 1]`。

use indicatif::{ProgressBar, ProgressIterator};
use ndarray::{ArrayD, IxDyn};
use opencv::core::{self, Mat, Vector};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{Error, Result};

/// 每个通道的桶数量
pub const BINS: usize = 8;
/// 直方图展平后的长度
pub const HIST_LEN: usize = BINS * BINS * BINS;

/// 一批图片的特征，参考图的特征单独保存
#[derive(Debug, Clone)]
pub struct FeatureSet<T> {
    pub items: Vec<T>,
    pub reference: Option<T>,
}

/// 计算单张图片归一化后的联合颜色直方图
///
/// 返回形状为 `[8, 8, 8]` 的数组，`flatten` 时为 `[512]`
pub fn color_histogram(image: &Mat, flatten: bool) -> Result<ArrayD<f32>> {
    if image.channels() < 3 {
        return Err(Error::Image(format!("至少需要 3 个通道，实际为 {}", image.channels())));
    }
    let images = Vector::<Mat>::from_iter([image.try_clone()?]);
    let channels = Vector::<i32>::from_slice(&[0, 1, 2]);
    let hist_size = Vector::<i32>::from_slice(&[BINS as i32; 3]);
    let ranges = Vector::<f32>::from_slice(&[0., 256., 0., 256., 0., 256.]);

    let mut hist = Mat::default();
    imgproc::calc_hist_def(&images, &channels, &Mat::default(), &mut hist, &hist_size, &ranges)?;
    let mut normalized = Mat::default();
    core::normalize(&hist, &mut normalized, 0., 1., core::NORM_MINMAX, -1, &Mat::default())?;

    let data = normalized.data_typed::<f32>()?.to_vec();
    let shape = if flatten { vec![HIST_LEN] } else { vec![BINS, BINS, BINS] };
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| Error::Image(e.to_string()))
}

/// 计算一批图片（以及可选参考图）的颜色直方图
pub fn compute_histograms(
    images: &[&Mat],
    reference: Option<&Mat>,
    flatten: bool,
    pb: &ProgressBar,
) -> Result<FeatureSet<ArrayD<f32>>> {
    pb.set_length(images.len() as u64);
    let items = images
        .iter()
        .progress_with(pb.clone())
        .map(|image| color_histogram(image, flatten))
        .collect::<Result<Vec<_>>>()?;
    pb.finish();
    let reference = reference.map(|image| color_histogram(image, flatten)).transpose()?;
    Ok(FeatureSet { items, reference })
}

/// 未做参考图混合时，相同直方图的组合得分：`0.5 * 1 + 0.25 * 1 - 0.25 * 0`
pub const SELF_SIMILARITY: f64 = 0.75;

fn to_mat(hist: &[f32]) -> Result<Mat> {
    Ok(Mat::from_slice(hist)?.try_clone()?)
}

/// 两个直方图的组合得分
///
/// `0.5 * 相关 + 0.25 * 交集 / sum(h1) - 0.25 * 卡方`，取绝对值。
/// `sum(h1)` 为零时交集项记为 0。得分越大越相似，相同直方图为 [`SELF_SIMILARITY`]。
pub fn histogram_similarity(h1: &[f32], h2: &[f32]) -> Result<f64> {
    let (m1, m2) = (to_mat(h1)?, to_mat(h2)?);
    let correlation = imgproc::compare_hist(&m1, &m2, imgproc::HISTCMP_CORREL)?;
    let chi_square = imgproc::compare_hist(&m1, &m2, imgproc::HISTCMP_CHISQR)?;
    let total = h1.iter().map(|&v| v as f64).sum::<f64>();
    let intersection =
        if total != 0. { imgproc::compare_hist(&m1, &m2, imgproc::HISTCMP_INTERSECT)? / total } else { 0. };
    Ok((0.5 * correlation + 0.25 * intersection - 0.25 * chi_square).abs())
}

#[cfg(test)]
mod tests {
    use ndarray::Ix3;

    use super::*;
    use crate::utils::testing::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn solid_image_has_single_peak() {
        let img = solid(4, 4, [0, 40, 255]);
        let hist = color_histogram(&img, false).unwrap().into_dimensionality::<Ix3>().unwrap();
        assert_eq!(hist[[0, 1, 7]], 1.);
        assert_eq!(hist.sum(), 1.);
    }

    #[test]
    fn flatten_round_trips() {
        let img = pattern(16, 16, |r, c| [(r * 16) as u8, (c * 16) as u8, ((r + c) * 8) as u8]);
        let nested = color_histogram(&img, false).unwrap();
        let flat = color_histogram(&img, true).unwrap();
        assert_eq!(flat.shape(), &[HIST_LEN]);
        assert_eq!(flat.into_shape_with_order(IxDyn(&[BINS, BINS, BINS])).unwrap(), nested);
    }

    #[test]
    fn values_are_min_max_normalized() {
        let img = pattern(8, 8, |r, _| if r < 6 { [0, 0, 0] } else { [255, 255, 255] });
        let hist = color_histogram(&img, true).unwrap();
        let max = hist.iter().cloned().fold(f32::MIN, f32::max);
        let min = hist.iter().cloned().fold(f32::MAX, f32::min);
        assert_eq!((min, max), (0., 1.));
        // 16 个白色像素，48 个黑色像素
        assert!((hist[HIST_LEN - 1] - 16. / 48.).abs() < 1e-6);
    }

    #[test]
    fn reference_is_returned_separately() {
        let a = solid(4, 4, [1, 2, 3]);
        let b = solid(4, 4, [200, 2, 3]);
        let set = compute_histograms(&[&a, &b], Some(&a), true, &ProgressBar::hidden()).unwrap();
        assert_eq!(set.items.len(), 2);
        assert_eq!(set.reference.as_ref(), Some(&set.items[0]));
    }

    fn compare(h1: &[f32], h2: &[f32], method: i32) -> f64 {
        imgproc::compare_hist(&to_mat(h1).unwrap(), &to_mat(h2).unwrap(), method).unwrap()
    }

    #[test]
    fn measures_on_identical_histograms() {
        let h = [0.0f32, 0.5, 1.0, 0.25];
        assert_close(compare(&h, &h, imgproc::HISTCMP_CORREL), 1.);
        assert_close(compare(&h, &h, imgproc::HISTCMP_CHISQR), 0.);
        assert_close(compare(&h, &h, imgproc::HISTCMP_INTERSECT), 1.75);
        // 0.5 * 1 + 0.25 * 1 - 0
        assert_close(histogram_similarity(&h, &h).unwrap(), SELF_SIMILARITY);
    }

    #[test]
    fn chi_square_skips_empty_bins() {
        let h1 = [0.0f32, 1.0];
        let h2 = [1.0f32, 0.5];
        assert_close(compare(&h1, &h2, imgproc::HISTCMP_CHISQR), 0.25);
    }

    #[test]
    fn zero_sum_histogram_is_finite() {
        let h1 = [0.0f32; 4];
        let h2 = [0.0f32, 1.0, 0.0, 0.0];
        let d = histogram_similarity(&h1, &h2).unwrap();
        assert!(d.is_finite());
        // 方差为零时相关系数为 1
        assert_close(d, 0.5);
    }

    #[test]
    fn different_peaks_score_below_identical() {
        let mut a = [0.0f32; HIST_LEN];
        let mut c = [0.0f32; HIST_LEN];
        a[3] = 1.;
        c[400] = 1.;
        let same = histogram_similarity(&a, &a).unwrap();
        let different = histogram_similarity(&a, &c).unwrap();
        assert_close(same, SELF_SIMILARITY);
        assert!(different < 0.26, "{}", different);
    }
}
