//! 工作区域提取：裁掉碎片周围的背景，只保留有内容的部分

use opencv::core::{self, Mat, Vec4b};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{Error, Result};
use crate::utils;

/// 工作区域提取器
///
/// `extract` 负责裁剪，`filter` 负责对裁剪结果做掩膜并输出 3 通道 BGR 图片
pub trait RegionExtractor: Sync {
    fn extract(&self, image: &Mat, threshold: i32) -> Result<Mat>;
    fn filter(&self, image: &Mat) -> Result<Mat>;
}

/// 基于阈值的外接矩形裁剪
///
/// 有 alpha 通道时用 alpha 判断前景，否则使用灰度值
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdRegion;

impl ThresholdRegion {
    fn foreground(image: &Mat) -> Result<Mat> {
        match image.channels() {
            1 => Ok(image.try_clone()?),
            3 => utils::cvt_color(image, imgproc::COLOR_BGR2GRAY),
            4 => {
                let mut alpha = Mat::default();
                core::extract_channel(image, &mut alpha, 3)?;
                Ok(alpha)
            }
            n => Err(Error::Image(format!("不支持的通道数: {}", n))),
        }
    }
}

impl RegionExtractor for ThresholdRegion {
    fn extract(&self, image: &Mat, threshold: i32) -> Result<Mat> {
        let fg = Self::foreground(image)?;
        let mut mask = Mat::default();
        imgproc::threshold(&fg, &mut mask, threshold as f64, 255., imgproc::THRESH_BINARY)?;

        let mut points = Mat::default();
        core::find_non_zero(&mask, &mut points)?;
        // 全是背景时保留原图
        if points.empty() {
            return Ok(image.try_clone()?);
        }
        let rect = imgproc::bounding_rect(&points)?;
        Ok(Mat::roi(image, rect)?.try_clone()?)
    }

    fn filter(&self, image: &Mat) -> Result<Mat> {
        if image.channels() != 4 {
            return utils::to_bgr(image);
        }
        let mut image = image.try_clone()?;
        for r in 0..image.rows() {
            for c in 0..image.cols() {
                let px = image.at_2d_mut::<Vec4b>(r, c)?;
                if px[3] == 0 {
                    *px = Vec4b::all(0);
                }
            }
        }
        utils::to_bgr(&image)
    }
}
