//! 结构相似性（SSIM）
//!
//! 使用 7x7 均值窗口、K1 = 0.01、K2 = 0.03、数据范围 255，
//! 方差使用样本协方差，结果为所有完整落在图片内的窗口的平均值。

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};

pub const WIN_SIZE: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.;

/// 二维前缀和，用于 O(1) 计算窗口和
struct Integral {
    table: Array2<f64>,
}

impl Integral {
    fn new(img: ArrayView2<f64>) -> Self {
        let (h, w) = img.dim();
        let mut table = Array2::<f64>::zeros((h + 1, w + 1));
        for r in 0..h {
            let mut row_sum = 0.;
            for c in 0..w {
                row_sum += img[[r, c]];
                table[[r + 1, c + 1]] = table[[r, c + 1]] + row_sum;
            }
        }
        Self { table }
    }

    /// 以 `(r, c)` 为左上角的窗口和
    fn window(&self, r: usize, c: usize, size: usize) -> f64 {
        let t = &self.table;
        t[[r + size, c + size]] - t[[r, c + size]] - t[[r + size, c]] + t[[r, c]]
    }
}

/// 计算两张同尺寸单通道图片的平均 SSIM，取值范围大致为 `[-1, 1]`
pub fn ssim(x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<f64> {
    if x.dim() != y.dim() {
        return Err(Error::Image(format!("SSIM 输入尺寸不一致: {:?} vs {:?}", x.dim(), y.dim())));
    }
    let (h, w) = x.dim();
    if h < WIN_SIZE || w < WIN_SIZE {
        return Err(Error::Image(format!("图片尺寸 {}x{} 小于 SSIM 窗口", w, h)));
    }

    let xx = &x * &x;
    let yy = &y * &y;
    let xy = &x * &y;
    let (ix, iy) = (Integral::new(x), Integral::new(y));
    let (ixx, iyy, ixy) = (Integral::new(xx.view()), Integral::new(yy.view()), Integral::new(xy.view()));

    let np = (WIN_SIZE * WIN_SIZE) as f64;
    let cov_norm = np / (np - 1.);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let (rows, cols) = (h - WIN_SIZE + 1, w - WIN_SIZE + 1);
    let mut total = 0.;
    for r in 0..rows {
        for c in 0..cols {
            let ux = ix.window(r, c, WIN_SIZE) / np;
            let uy = iy.window(r, c, WIN_SIZE) / np;
            let uxx = ixx.window(r, c, WIN_SIZE) / np;
            let uyy = iyy.window(r, c, WIN_SIZE) / np;
            let uxy = ixy.window(r, c, WIN_SIZE) / np;
            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let a1 = 2. * ux * uy + c1;
            let a2 = 2. * vxy + c2;
            let b1 = ux * ux + uy * uy + c1;
            let b2 = vx + vy + c2;
            total += (a1 * a2) / (b1 * b2);
        }
    }
    Ok(total / (rows * cols) as f64)
}

/// 多通道逐通道计算 SSIM 后取平均
pub fn ssim_channels(x: &[Array2<f64>], y: &[Array2<f64>]) -> Result<f64> {
    if x.len() != y.len() || x.is_empty() {
        return Err(Error::Image(format!("通道数不一致: {} vs {}", x.len(), y.len())));
    }
    let mut sum = 0.;
    for (a, b) in x.iter().zip(y) {
        sum += ssim(a.view(), b.view())?;
    }
    Ok(sum / x.len() as f64)
}
