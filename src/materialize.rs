use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator};
use log::info;

use crate::cluster::NOISE;
use crate::error::{Error, IoContext, Result};

/// 未归类碎片所在的目录名
pub const UNCLUSTERED: &str = "unclustered";

/// 标签对应的目录名
pub fn cluster_dir_name(label: i32) -> String {
    if label == NOISE { UNCLUSTERED.to_string() } else { format!("cluster_{}", label) }
}

/// 按标签把碎片复制到各自的簇目录
///
/// `output_dir` 已存在时会被整个删除后重建。复制过程不是原子的，
/// 出错时已复制的文件会保留。返回每个目录复制的文件数量。
pub fn materialize_clusters(
    source_paths: &[PathBuf],
    labels: &[i32],
    output_dir: &Path,
    pb: &ProgressBar,
) -> Result<BTreeMap<String, usize>> {
    if source_paths.len() != labels.len() {
        return Err(Error::config(format!(
            "碎片数量 {} 与标签数量 {} 不一致",
            source_paths.len(),
            labels.len()
        )));
    }
    if let Some(bad) = labels.iter().find(|&&l| l < NOISE) {
        return Err(Error::config(format!("无效的簇标签: {}", bad)));
    }

    if output_dir.exists() {
        fs::remove_dir_all(output_dir).with_path(output_dir)?;
    }
    fs::create_dir_all(output_dir).with_path(output_dir)?;

    let mut counts = BTreeMap::new();
    pb.set_length(labels.len() as u64);
    for (path, &label) in source_paths.iter().zip(labels).progress_with(pb.clone()) {
        let name = cluster_dir_name(label);
        let cluster_dir = output_dir.join(&name);
        fs::create_dir_all(&cluster_dir).with_path(&cluster_dir)?;

        let file_name = path
            .file_name()
            .ok_or_else(|| Error::config(format!("{} 没有文件名", path.display())))?;
        let target = cluster_dir.join(file_name);
        fs::copy(path, &target).with_path(path)?;
        *counts.entry(name).or_insert(0) += 1;
    }
    pb.finish();

    info!("已将 {} 个碎片复制到 {} 个目录，输出目录 {}", labels.len(), counts.len(), output_dir.display());
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use assert_fs::prelude::*;

    use super::*;

    #[test]
    fn dir_names() {
        assert_eq!(cluster_dir_name(-1), "unclustered");
        assert_eq!(cluster_dir_name(0), "cluster_0");
        assert_eq!(cluster_dir_name(12), "cluster_12");
    }

    #[test]
    fn copies_into_cluster_dirs() {
        let input = assert_fs::TempDir::new().unwrap();
        let output = assert_fs::TempDir::new().unwrap();
        let out = output.path().join("clusters");
        let names = ["a.1.png", "b.1.png", "c.2.png"];
        let paths = names
            .iter()
            .map(|n| {
                let f = input.child(n);
                f.write_str(n).unwrap();
                f.path().to_path_buf()
            })
            .collect::<Vec<_>>();

        // 旧的输出会被清空
        fs::create_dir_all(out.join("stale")).unwrap();

        let counts = materialize_clusters(&paths, &[0, 0, -1], &out, &ProgressBar::hidden()).unwrap();
        assert_eq!(counts.get("cluster_0"), Some(&2));
        assert_eq!(counts.get("unclustered"), Some(&1));

        let out = assert_fs::fixture::ChildPath::new(out);
        out.child("cluster_0/a.1.png").assert("a.1.png");
        out.child("cluster_0/b.1.png").assert("b.1.png");
        out.child("unclustered/c.2.png").assert("c.2.png");
        out.child("stale").assert(predicates::path::missing());
        // 源文件保持不变
        input.child("a.1.png").assert(predicates::path::exists());
    }

    #[test]
    fn length_mismatch_is_configuration_error() {
        let output = assert_fs::TempDir::new().unwrap();
        let out = output.path().join("clusters");
        let paths = vec![PathBuf::from("a.1.png"), PathBuf::from("b.1.png")];
        let err = materialize_clusters(&paths, &[0], &out, &ProgressBar::hidden()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        // 校验失败时不会动输出目录
        assert!(!out.exists());
    }

    #[test]
    fn missing_source_is_io_failure() {
        let output = assert_fs::TempDir::new().unwrap();
        let paths = vec![PathBuf::from("/nonexistent/a.1.png")];
        let err = materialize_clusters(&paths, &[0], output.path(), &ProgressBar::hidden()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
