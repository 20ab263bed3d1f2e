//! 聚类结果评估
//!
//! 真实来源编码在文件名中：`<name>.<source_id>.<ext>`。对于给定的 `source_id`，
//! 每个簇目录被视为一次"预测为该来源"，据此计算精确率、召回率、F1 和准确率。
//! 所有无定义的比值（分母为 0）都记为 0。

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use log::debug;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

/// 用于挑选最佳簇目录的指标
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMetric {
    Precision,
    Recall,
    F1,
    Accuracy,
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::Accuracy => "accuracy",
        };
        f.write_str(name)
    }
}

impl FromStr for EvalMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, false)
            .map_err(|_| Error::config(format!("无效的评估指标: {:?}", s)))
    }
}

/// 单个簇目录的得分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl ScoreRecord {
    pub fn get(&self, metric: EvalMetric) -> f64 {
        match metric {
            EvalMetric::Precision => self.precision,
            EvalMetric::Recall => self.recall,
            EvalMetric::F1 => self.f1,
            EvalMetric::Accuracy => self.accuracy,
        }
    }
}

/// 文件名中的来源编号，即第一个 `.` 之后的部分
pub fn source_id(file_name: &str) -> Option<&str> {
    file_name.split('.').nth(1)
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 { 0. } else { num as f64 / denom as f64 }
}

/// 精确率与召回率的调和平均，二者之和为 0 时为 0
pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0. {
        return 0.;
    }
    2. * (precision * recall) / (precision + recall)
}

/// 文件计数：来源匹配的和不匹配的
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    matching: usize,
    other: usize,
}

impl Counts {
    fn add(&mut self, rhs: Counts) {
        self.matching += rhs.matching;
        self.other += rhs.other;
    }
}

/// 参与评估的目录与文件过滤条件
#[derive(Debug, Clone)]
pub struct Evaluator {
    source_id: String,
    ext: String,
}

impl Evaluator {
    pub fn new(source_id: impl Into<String>, ext: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), ext: ext.into() }
    }

    fn classify(&self, file_name: &str, counts: &mut Counts) {
        if !file_name.ends_with(&self.ext) {
            return;
        }
        if source_id(file_name) == Some(self.source_id.as_str()) {
            counts.matching += 1;
        } else {
            counts.other += 1;
        }
    }

    /// 递归统计 `dir` 下的文件，名称在 `exclude` 中的子目录（任意层级）被跳过
    fn count(&self, dir: &Path, exclude: &[&str]) -> Result<Counts> {
        let mut counts = Counts::default();
        let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !exclude.iter().any(|x| e.file_name().to_string_lossy() == *x)
        });
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                Error::io(path, e.into())
            })?;
            if entry.file_type().is_file() {
                self.classify(&entry.file_name().to_string_lossy(), &mut counts);
            }
        }
        Ok(counts)
    }

    fn count_inside(&self, root_dir: &Path, cluster_dirs: &[&str]) -> Result<Counts> {
        let mut counts = Counts::default();
        for dir in cluster_dirs {
            let path = root_dir.join(dir);
            if path.is_dir() {
                counts.add(self.count(&path, &[])?);
            }
        }
        Ok(counts)
    }

    /// 精确率：目录中来源匹配的文件数 / 目录中的文件总数
    pub fn precision(&self, cluster_dir: &Path) -> Result<f64> {
        let mut counts = Counts::default();
        let mut total = 0;
        for entry in fs::read_dir(cluster_dir).with_path(cluster_dir)? {
            let entry = entry.with_path(cluster_dir)?;
            total += 1;
            self.classify(&entry.file_name().to_string_lossy(), &mut counts);
        }
        Ok(ratio(counts.matching, total))
    }

    /// 召回率：簇目录内的匹配文件数 / 整棵目录树中的匹配文件数
    pub fn recall(&self, root_dir: &Path, cluster_dirs: &[&str]) -> Result<f64> {
        let tp = self.count_inside(root_dir, cluster_dirs)?.matching;
        let fn_ = self.count(root_dir, cluster_dirs)?.matching;
        Ok(ratio(tp, tp + fn_))
    }

    /// 准确率：(簇内匹配 + 簇外不匹配) / 全部文件
    pub fn accuracy(&self, root_dir: &Path, cluster_dirs: &[&str]) -> Result<f64> {
        let inside = self.count_inside(root_dir, cluster_dirs)?;
        let outside = self.count(root_dir, cluster_dirs)?;
        let total = inside.matching + inside.other + outside.matching + outside.other;
        Ok(ratio(inside.matching + outside.other, total))
    }

    pub fn score(&self, root_dir: &Path, cluster_dir: &str) -> Result<ScoreRecord> {
        let precision = self.precision(&root_dir.join(cluster_dir))?;
        let recall = self.recall(root_dir, &[cluster_dir])?;
        let accuracy = self.accuracy(root_dir, &[cluster_dir])?;
        Ok(ScoreRecord { precision, recall, f1: f1(precision, recall), accuracy })
    }

    /// 为 `root_dir` 的每个直接子目录打分，并找出指定指标最高的目录（可能并列）
    pub fn evaluate_all_clusters(&self, root_dir: &Path, metric: EvalMetric) -> Result<EvaluationReport> {
        if !root_dir.is_dir() {
            return Err(Error::config(format!("簇目录不存在: {}", root_dir.display())));
        }
        let mut scores = BTreeMap::new();
        for entry in fs::read_dir(root_dir).with_path(root_dir)? {
            let entry = entry.with_path(root_dir)?;
            if !entry.file_type().with_path(entry.path())?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let record = self.score(root_dir, &name)?;
            debug!("{}: {:?}", name, record);
            scores.insert(name, record);
        }

        let best_value = scores
            .values()
            .map(|r| r.get(metric))
            .reduce(f64::max)
            .ok_or_else(|| Error::config(format!("{} 中没有簇目录", root_dir.display())))?;
        let best = scores
            .iter()
            .filter(|(_, r)| r.get(metric) == best_value)
            .map(|(name, r)| (name.clone(), r.get(metric)))
            .collect();

        Ok(EvaluationReport { metric, best, scores })
    }
}

/// 评估结果：最佳目录（并列时有多个）以及每个目录的得分
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub metric: EvalMetric,
    pub best: Vec<(String, f64)>,
    pub scores: BTreeMap<String, ScoreRecord>,
}

impl Serialize for EvaluationReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&format!("max_{}", self.metric), &self.best)?;
        map.serialize_entry("scores", &self.scores)?;
        map.end()
    }
}

impl EvaluationReport {
    /// 4 空格缩进的 JSON
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let mut file = fs::File::create(path).with_path(path)?;
        file.write_all(json.as_bytes()).with_path(path)?;
        Ok(())
    }
}

/// 便捷函数，对应 [`Evaluator::evaluate_all_clusters`]
pub fn evaluate_all_clusters(
    source_id: &str,
    root_dir: &Path,
    ext: &str,
    metric: EvalMetric,
    output: Option<&Path>,
) -> Result<EvaluationReport> {
    let report = Evaluator::new(source_id, ext).evaluate_all_clusters(root_dir, metric)?;
    if let Some(path) = output {
        report.save(path)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use rstest::*;

    use super::*;

    /// cluster_0 = {0.1.png, dup.1.png}, cluster_1 = {0.2.png}
    #[fixture]
    fn clusters() -> TempDir {
        let root = TempDir::new().unwrap();
        root.child("cluster_0/0.1.png").touch().unwrap();
        root.child("cluster_0/dup.1.png").touch().unwrap();
        root.child("cluster_1/0.2.png").touch().unwrap();
        root
    }

    /// 三个来源混在两个簇和一个未归类目录中
    #[fixture]
    fn mixed() -> TempDir {
        let root = TempDir::new().unwrap();
        for f in ["cluster_0/a.1.png", "cluster_0/b.1.png", "cluster_0/c.2.png"] {
            root.child(f).touch().unwrap();
        }
        for f in ["cluster_1/d.1.png", "cluster_1/e.3.png"] {
            root.child(f).touch().unwrap();
        }
        for f in ["unclustered/f.2.png", "unclustered/notes.txt"] {
            root.child(f).touch().unwrap();
        }
        root
    }

    #[rstest]
    #[case(0., 0., 0.)]
    #[case(1., 1., 1.)]
    #[case(0.5, 1., 2. / 3.)]
    #[case(1., 0., 0.)]
    fn f1_values(#[case] p: f64, #[case] r: f64, #[case] expected: f64) {
        assert!((f1(p, r) - expected).abs() < 1e-12);
    }

    #[test]
    fn source_id_token() {
        assert_eq!(source_id("0.1.png"), Some("1"));
        assert_eq!(source_id("dup.17.png"), Some("17"));
        assert_eq!(source_id("nodot"), None);
    }

    #[rstest]
    fn perfect_cluster(clusters: TempDir) {
        let eval = Evaluator::new("1", ".png");
        let record = eval.score(clusters.path(), "cluster_0").unwrap();
        assert_eq!(record, ScoreRecord { precision: 1., recall: 1., f1: 1., accuracy: 1. });

        let other = eval.score(clusters.path(), "cluster_1").unwrap();
        assert_eq!(other.precision, 0.);
        assert_eq!(other.recall, 0.);
        assert_eq!(other.f1, 0.);
        // cluster_1 内 1 个错误，外面 2 个匹配也算错
        assert_eq!(other.accuracy, 0.);
    }

    #[rstest]
    fn mixed_scores(mixed: TempDir) {
        let eval = Evaluator::new("1", ".png");
        let root = mixed.path();

        assert!((eval.precision(&root.join("cluster_0")).unwrap() - 2. / 3.).abs() < 1e-12);
        assert!((eval.recall(root, &["cluster_0"]).unwrap() - 2. / 3.).abs() < 1e-12);
        // 簇内 2 个匹配，簇外 d.1 为漏检，e.3 和 f.2 为正确的否定；notes.txt 不计入
        assert!((eval.accuracy(root, &["cluster_0"]).unwrap() - 4. / 6.).abs() < 1e-12);
        // 精确率的分母包含目录中所有文件
        assert_eq!(eval.precision(&root.join("unclustered")).unwrap(), 0.);
        assert!((eval.recall(root, &["cluster_0", "cluster_1"]).unwrap() - 1.).abs() < 1e-12);
    }

    #[test]
    fn empty_directory_scores_zero() {
        let root = TempDir::new().unwrap();
        root.child("cluster_0").create_dir_all().unwrap();
        let eval = Evaluator::new("1", ".png");
        assert_eq!(eval.precision(&root.path().join("cluster_0")).unwrap(), 0.);
        assert_eq!(eval.recall(root.path(), &["cluster_0"]).unwrap(), 0.);
        assert_eq!(eval.accuracy(root.path(), &["cluster_0"]).unwrap(), 0.);
    }

    #[rstest]
    fn best_cluster_and_json(clusters: TempDir) {
        let out = clusters.path().join("metrics.json");
        let report = evaluate_all_clusters("1", clusters.path(), ".png", EvalMetric::F1, Some(out.as_path())).unwrap();
        assert_eq!(report.best, vec![("cluster_0".to_string(), 1.)]);
        assert_eq!(report.scores.len(), 2);

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["max_f1"], serde_json::json!([["cluster_0", 1.0]]));
        assert_eq!(json["scores"]["cluster_1"]["precision"], 0.0);
        assert!(report.to_json().unwrap().contains("\n    \"max_f1\""));
    }

    #[test]
    fn ties_are_all_reported() {
        let root = TempDir::new().unwrap();
        root.child("cluster_0/a.1.png").touch().unwrap();
        root.child("cluster_1/b.1.png").touch().unwrap();
        let report =
            Evaluator::new("1", ".png").evaluate_all_clusters(root.path(), EvalMetric::Precision).unwrap();
        assert_eq!(report.best, vec![("cluster_0".to_string(), 1.), ("cluster_1".to_string(), 1.)]);
    }

    #[test]
    fn no_cluster_dirs_is_error() {
        let root = TempDir::new().unwrap();
        let err = Evaluator::new("1", ".png").evaluate_all_clusters(root.path(), EvalMetric::F1).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn metric_names() {
        assert_eq!("f1".parse::<EvalMetric>().unwrap(), EvalMetric::F1);
        assert!(matches!("auc".parse::<EvalMetric>(), Err(Error::Configuration(_))));
        assert_eq!(EvalMetric::Accuracy.to_string(), "accuracy");
    }
}
