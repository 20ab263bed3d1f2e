//! 梯度场（雅可比）特征
//!
//! 梯度场的形状为 `[2, 2, h, w]`：第一维为方向（0 = x，1 = y），
//! 第二维为来源（0 = 彩色通道，1 = 灰度）。展平后按同样的顺序排列。

use indicatif::{ProgressBar, ProgressIterator};
use ndarray::{Array2, Array4, ArrayD, ArrayView1, ArrayView2, Axis, s};
use opencv::core::{self, Mat};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;

use crate::error::{Error, Result};
use crate::histogram::FeatureSet;
use crate::utils;

/// 梯度算子，输入为 HSV 图片
pub trait GradientOperator: Sync {
    fn gradient(&self, hsv: &Mat) -> Result<Array4<f32>>;
}

/// 3x3 Sobel 算子
///
/// 彩色分量为三个通道导数的 L2 范数，灰度分量为 V 通道的导数
#[derive(Debug, Default, Clone, Copy)]
pub struct SobelGradient;

impl SobelGradient {
    fn derivative(channel: &Mat, dx: i32, dy: i32) -> Result<Array2<f64>> {
        let mut output = Mat::default();
        imgproc::sobel_def(channel, &mut output, core::CV_64F, dx, dy)?;
        utils::mat_to_array(&output)
    }
}

impl GradientOperator for SobelGradient {
    fn gradient(&self, hsv: &Mat) -> Result<Array4<f32>> {
        let channels = utils::split(hsv)?;
        if channels.len() != 3 {
            return Err(Error::Image(format!("需要 3 通道图片，实际为 {}", channels.len())));
        }
        let (h, w) = (hsv.rows() as usize, hsv.cols() as usize);
        let mut field = Array4::<f32>::zeros((2, 2, h, w));

        for (axis, (dx, dy)) in [(1, 0), (0, 1)].into_iter().enumerate() {
            let mut color = Array2::<f64>::zeros((h, w));
            let mut value = Array2::<f64>::zeros((h, w));
            for (i, channel) in channels.iter().enumerate() {
                let d = Self::derivative(channel, dx, dy)?;
                color.zip_mut_with(&d, |acc, v| *acc += v * v);
                if i == 2 {
                    value = d;
                }
            }
            field.slice_mut(s![axis, 0, .., ..]).assign(&color.mapv(|v| v.sqrt() as f32));
            field.slice_mut(s![axis, 1, .., ..]).assign(&value.mapv(|v| v as f32));
        }
        Ok(field)
    }
}

/// 梯度场拆分出的四个向量，长度均为 `w * h`
#[derive(Debug, Clone, Copy)]
pub struct GradientComponents<'a> {
    pub gx: ArrayView1<'a, f32>,
    pub gx_gray: ArrayView1<'a, f32>,
    pub gy: ArrayView1<'a, f32>,
    pub gy_gray: ArrayView1<'a, f32>,
}

impl<'a> GradientComponents<'a> {
    /// 将梯度场（无论是否展平）重新解释为 4 行
    pub fn from_field(field: &'a ArrayD<f32>) -> Result<Self> {
        let len = field.len();
        if len % 4 != 0 {
            return Err(Error::config(format!("梯度场长度 {} 无法均分为 4 段", len)));
        }
        let flat = field.as_slice().ok_or_else(|| Error::config("梯度场内存不连续"))?;
        let rows = ArrayView2::from_shape((4, len / 4), flat)
            .map_err(|e| Error::config(e.to_string()))?;
        Ok(Self {
            gx: rows.index_axis_move(Axis(0), 0),
            gx_gray: rows.index_axis_move(Axis(0), 1),
            gy: rows.index_axis_move(Axis(0), 2),
            gy_gray: rows.index_axis_move(Axis(0), 3),
        })
    }

    pub fn as_array(&self) -> [ArrayView1<'a, f32>; 4] {
        [self.gx, self.gx_gray, self.gy, self.gy_gray]
    }
}

/// 缩放到统一尺寸，转换为 HSV 后计算梯度场
pub fn image_gradient(
    image: &Mat,
    (width, height): (i32, i32),
    interpolation: InterpolationFlags,
    operator: &dyn GradientOperator,
    flatten: bool,
) -> Result<ArrayD<f32>> {
    let resized = utils::resize(&utils::to_bgr(image)?, width, height, interpolation)?;
    let hsv = utils::cvt_color(&resized, imgproc::COLOR_BGR2HSV)?;
    let field = operator.gradient(&hsv)?.into_dyn();
    if flatten {
        let len = field.len();
        return field.into_shape_with_order(len).map(|a| a.into_dyn()).map_err(|e| Error::Image(e.to_string()));
    }
    Ok(field)
}

/// 计算一批图片（以及可选参考图）的梯度场
///
/// 所有图片（包括参考图）都会先缩放到这批图片的最大宽高
pub fn compute_gradients(
    images: &[&Mat],
    reference: Option<&Mat>,
    interpolation: InterpolationFlags,
    operator: &dyn GradientOperator,
    flatten: bool,
    pb: &ProgressBar,
) -> Result<FeatureSet<ArrayD<f32>>> {
    let Some(size) = utils::max_size(images.iter().copied().chain(reference)) else {
        return Ok(FeatureSet { items: vec![], reference: None });
    };
    pb.set_length(images.len() as u64);
    let items = images
        .iter()
        .progress_with(pb.clone())
        .map(|image| image_gradient(image, size, interpolation, operator, flatten))
        .collect::<Result<Vec<_>>>()?;
    pb.finish();
    let reference = reference
        .map(|image| image_gradient(image, size, interpolation, operator, flatten))
        .transpose()?;
    Ok(FeatureSet { items, reference })
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;
    use crate::utils::testing::*;

    #[test]
    fn components_follow_slot_order() {
        // 每个槽位填充自己的编号
        let field = Array::from_shape_fn((2, 2, 3, 2), |(a, b, _, _)| (a * 2 + b) as f32).into_dyn();
        let parts = GradientComponents::from_field(&field).unwrap();
        assert!(parts.gx.iter().all(|&v| v == 0.));
        assert!(parts.gx_gray.iter().all(|&v| v == 1.));
        assert!(parts.gy.iter().all(|&v| v == 2.));
        assert!(parts.gy_gray.iter().all(|&v| v == 3.));
        assert_eq!(parts.gx.len(), 6);
    }

    #[test]
    fn components_of_flattened_field_match() {
        let field = Array::from_shape_fn((2, 2, 4, 5), |(a, b, r, c)| (a * 1000 + b * 100 + r * 10 + c) as f32);
        let nested = field.clone().into_dyn();
        let flat = field.into_shape_with_order(80).unwrap().into_dyn();
        let (p1, p2) =
            (GradientComponents::from_field(&nested).unwrap(), GradientComponents::from_field(&flat).unwrap());
        assert_eq!(p1.as_array(), p2.as_array());
    }

    #[test]
    fn rejects_uneven_field() {
        let field = Array::zeros(7).into_dyn();
        assert!(matches!(GradientComponents::from_field(&field), Err(Error::Configuration(_))));
    }

    #[test]
    fn sobel_on_flat_image_is_zero() {
        let hsv = solid(6, 6, [10, 20, 30]);
        let field = SobelGradient.gradient(&hsv).unwrap();
        assert_eq!(field.shape(), &[2, 2, 6, 6]);
        assert!(field.iter().all(|&v| v == 0.));
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        let hsv = pattern(6, 6, |_, c| if c < 3 { [0, 0, 0] } else { [0, 0, 200] });
        let field = SobelGradient.gradient(&hsv).unwrap();
        // x 方向有响应，y 方向没有
        assert!(field.slice(s![0, 1, .., ..]).iter().any(|&v| v != 0.));
        assert!(field.slice(s![1, 1, .., ..]).iter().all(|&v| v == 0.));
        assert_eq!(field[[0, 0, 2, 2]], field[[0, 1, 2, 2]].abs());
    }

    #[test]
    fn gradients_share_max_size() {
        let a = solid(4, 10, [0, 0, 0]);
        let b = solid(8, 6, [0, 0, 0]);
        let r = solid(5, 12, [0, 0, 0]);
        let set = compute_gradients(
            &[&a, &b],
            Some(&r),
            InterpolationFlags::INTER_LINEAR,
            &SobelGradient,
            false,
            &ProgressBar::hidden(),
        )
        .unwrap();
        for field in set.items.iter().chain(set.reference.iter()) {
            assert_eq!(field.shape(), &[2, 2, 8, 12]);
        }
    }

    #[test]
    fn flattened_gradient_is_one_dimensional() {
        let a = solid(4, 4, [0, 0, 0]);
        let set = compute_gradients(
            &[&a],
            None,
            InterpolationFlags::INTER_NEAREST,
            &SobelGradient,
            true,
            &ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(set.items[0].shape(), &[64]);
        assert!(set.reference.is_none());
    }
}
