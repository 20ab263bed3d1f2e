use std::path::{Path, PathBuf};

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info};
use opencv::core::Mat;
use opencv::photo;
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::config::DatasetOptions;
use crate::error::{Error, IoContext, Result};
use crate::region::RegionExtractor;
use crate::utils;

/// 一个碎片：预处理后的图片及其来源路径
#[derive(Debug)]
pub struct Fragment {
    pub path: PathBuf,
    pub image: Mat,
}

impl Fragment {
    pub fn file_name(&self) -> String {
        self.path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

/// 构建后缀匹配正则，多个后缀用逗号分隔，忽略大小写
pub fn suffix_regex(ext: &str) -> Result<Regex> {
    let alternatives = ext
        .split(',')
        .map(|s| regex::escape(s.trim().trim_start_matches('.')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if alternatives.is_empty() {
        return Err(Error::config(format!("无效的后缀列表: {:?}", ext)));
    }
    Regex::new(&format!(r"(?i)\.({})$", alternatives.join("|")))
        .map_err(|e| Error::config(e.to_string()))
}

/// 列出目录下（不递归）所有匹配后缀的文件，按文件名排序
pub fn list_fragments(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::config(format!("图片目录不存在: {}", dir.display())));
    }
    let re = suffix_regex(ext)?;
    let mut paths = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::io(path, e.into())
        })?;
        if entry.file_type().is_file() && re.is_match(&entry.file_name().to_string_lossy()) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// 读取并预处理单张图片
pub fn load_fragment(
    path: &Path,
    opts: &DatasetOptions,
    region: &dyn RegionExtractor,
) -> Result<Mat> {
    let mut image = utils::imread(path)?;
    if !opts.no_crop {
        image = region.filter(&region.extract(&image, opts.threshold)?)?;
    }
    // 去噪只接受 3 通道图片
    image = utils::to_bgr(&image)?;
    if let Some(code) = opts.color {
        image = utils::cvt_color(&image, code)?;
        image = utils::to_bgr(&image)?;
    }
    let mut denoised = Mat::default();
    photo::fast_nl_means_denoising_colored(&image, &mut denoised, opts.h, opts.h_color, 7, 21)?;
    Ok(denoised)
}

/// 从目录构建数据集，返回值与文件列表一一对应
pub fn build_dataset(
    dir: &Path,
    opts: &DatasetOptions,
    region: &dyn RegionExtractor,
    pb: &ProgressBar,
) -> Result<Vec<Fragment>> {
    let paths = list_fragments(dir, &opts.ext)?;
    info!("在 {1} 中找到 {0} 个碎片", paths.len(), dir.display());

    pb.set_length(paths.len() as u64);
    let fragments = paths
        .into_par_iter()
        .progress_with(pb.clone())
        .map(|path| {
            debug!("读取 {}", path.display());
            let image = load_fragment(&path, opts, region)?;
            Ok(Fragment { path, image })
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish();

    Ok(fragments)
}

/// 将 `in_dir` 中的所有文件移动到 `out_dir`，同名文件会被覆盖，子目录保持不动
pub fn restore_files(in_dir: &Path, out_dir: &Path) -> Result<usize> {
    let mut moved = 0;
    for entry in std::fs::read_dir(in_dir).with_path(in_dir)? {
        let entry = entry.with_path(in_dir)?;
        let path = entry.path();
        if !entry.file_type().with_path(&path)?.is_file() {
            debug!("跳过 {}", path.display());
            continue;
        }
        let target = out_dir.join(entry.file_name());
        match std::fs::rename(&path, &target) {
            Ok(()) => {}
            // 跨设备时退回到复制后删除
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                std::fs::copy(&path, &target).with_path(&target)?;
                std::fs::remove_file(&path).with_path(&path)?;
            }
            Err(e) => return Err(Error::io(path, e)),
        }
        moved += 1;
    }
    Ok(moved)
}
