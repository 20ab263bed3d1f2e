use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use opencv::core::{self, Mat, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;

use crate::error::{Error, Result};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:28} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>6}/{len:6} ({eta})",
    )
    .expect("invalid progress bar template")
}

/// 创建一个带统一样式的进度条
pub fn progress_bar(len: usize, msg: &'static str) -> ProgressBar {
    ProgressBar::new(len as u64).with_style(pb_style()).with_message(msg)
}

/// 读取图片，保留所有通道（包括 alpha）
pub fn imread(path: &Path) -> Result<Mat> {
    let filename = path.to_string_lossy();
    let img = imgcodecs::imread(&filename, imgcodecs::IMREAD_UNCHANGED)?;
    if img.empty() {
        return Err(Error::Image(format!("无法解码图片: {}", path.display())));
    }
    Ok(img)
}

pub fn imwrite(path: &Path, img: &Mat) -> Result<()> {
    let flags = Vector::<i32>::new();
    if !imgcodecs::imwrite(&path.to_string_lossy(), img, &flags)? {
        return Err(Error::Image(format!("无法保存图片: {}", path.display())));
    }
    Ok(())
}

pub fn cvt_color(img: &Mat, code: i32) -> Result<Mat> {
    let mut output = Mat::default();
    imgproc::cvt_color_def(img, &mut output, code)?;
    Ok(output)
}

/// 缩放到指定宽高，尺寸一致时直接复制
pub fn resize(img: &Mat, width: i32, height: i32, interpolation: InterpolationFlags) -> Result<Mat> {
    if img.cols() == width && img.rows() == height {
        return Ok(img.try_clone()?);
    }
    let mut output = Mat::default();
    imgproc::resize(img, &mut output, Size::new(width, height), 0., 0., interpolation as i32)?;
    Ok(output)
}

/// 将任意通道数的 8 位图片转换为 3 通道 BGR
pub fn to_bgr(img: &Mat) -> Result<Mat> {
    match img.channels() {
        1 => cvt_color(img, imgproc::COLOR_GRAY2BGR),
        3 => Ok(img.try_clone()?),
        4 => cvt_color(img, imgproc::COLOR_BGRA2BGR),
        n => Err(Error::Image(format!("不支持的通道数: {}", n))),
    }
}

/// 拆分多通道图片
pub fn split(img: &Mat) -> Result<Vec<Mat>> {
    let mut channels = Vector::<Mat>::new();
    core::split(img, &mut channels)?;
    Ok(channels.to_vec())
}

/// 单通道 Mat 转换为 f64 矩阵，任意位深均可
pub fn mat_to_array(mat: &Mat) -> Result<Array2<f64>> {
    if mat.channels() != 1 {
        return Err(Error::Image(format!("需要单通道图片，实际为 {} 通道", mat.channels())));
    }
    let mut converted = Mat::default();
    mat.convert_to_def(&mut converted, core::CV_64F)?;
    let (rows, cols) = (converted.rows() as usize, converted.cols() as usize);
    let data = converted.data_typed::<f64>()?.to_vec();
    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Image(e.to_string()))
}

/// 一批图片（以及可选的参考图）的最大宽高
pub fn max_size<'a>(images: impl IntoIterator<Item = &'a Mat>) -> Option<(i32, i32)> {
    images.into_iter().map(|img| (img.cols(), img.rows())).reduce(|a, b| (a.0.max(b.0), a.1.max(b.1)))
}
