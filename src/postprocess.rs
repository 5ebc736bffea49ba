// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/postprocess.rs - 模型输出后处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt, str::FromStr};

use tracing::debug;

/// 概率和的容差范围（含边界）
const PROBABILITY_SUM_MIN: f32 = 0.99;
const PROBABILITY_SUM_MAX: f32 = 1.01;

/// 模型输出的含义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputKind {
  /// 未声明，按数值启发式判断
  #[default]
  Auto,
  Probabilities,
  Logits,
}

impl OutputKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OutputKind::Auto => "auto",
      OutputKind::Probabilities => "probabilities",
      OutputKind::Logits => "logits",
    }
  }
}

impl fmt::Display for OutputKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OutputKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(OutputKind::Auto),
      "probabilities" | "probs" | "softmax" => Ok(OutputKind::Probabilities),
      "logits" => Ok(OutputKind::Logits),
      other => Err(format!("未知的输出类型: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub index: usize,
  pub label: String,
  pub score: f32,
}

/// 按得分降序排列的分类结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
  pub predictions: Vec<Prediction>,
}

impl Classification {
  pub fn top1(&self) -> Option<&Prediction> {
    self.predictions.first()
  }

  pub fn is_empty(&self) -> bool {
    self.predictions.is_empty()
  }

  pub fn len(&self) -> usize {
    self.predictions.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
    self.predictions.iter()
  }
}

/// 判断一组输出是否已经是概率分布：无负值且总和落在 [0.99, 1.01]
pub fn looks_like_probabilities(values: &[f32]) -> bool {
  let sum: f32 = values.iter().sum();
  let any_negative = values.iter().any(|&v| v < 0.0);
  !any_negative && (PROBABILITY_SUM_MIN..=PROBABILITY_SUM_MAX).contains(&sum)
}

/// 数值稳定的 softmax
///
/// 先减去最大值再取指数；指数和为 0 时返回全 0 向量。
pub fn softmax(values: &[f32]) -> Vec<f32> {
  if values.is_empty() {
    return Vec::new();
  }

  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = values.iter().map(|&v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();

  if sum == 0.0 {
    return vec![0.0; values.len()];
  }
  exps.into_iter().map(|e| e / sum).collect()
}

/// 将原始输出转换为概率分布
pub fn normalize(raw: &[f32], kind: OutputKind) -> Vec<f32> {
  let as_logits = match kind {
    OutputKind::Logits => true,
    OutputKind::Probabilities => false,
    OutputKind::Auto => !looks_like_probabilities(raw),
  };

  if as_logits {
    debug!("输出按 logits 处理，应用 softmax");
    softmax(raw)
  } else {
    raw.iter().map(|&v| v.clamp(0.0, 1.0)).collect()
  }
}

/// 超出标签表范围的类别使用 `class_<index>` 作为名称
pub fn label_for(labels: &[String], index: usize) -> String {
  labels
    .get(index)
    .cloned()
    .unwrap_or_else(|| format!("class_{}", index))
}

/// 取得分最高的 `k` 个类别，得分相同时索引较小者在前
pub fn top_k(probs: &[f32], labels: &[String], k: usize) -> Classification {
  let mut indices: Vec<usize> = (0..probs.len()).collect();
  // sort_by 是稳定排序
  indices.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

  let predictions = indices
    .into_iter()
    .take(k.min(probs.len()))
    .map(|index| Prediction {
      index,
      label: label_for(labels, index),
      score: probs[index],
    })
    .collect();

  Classification { predictions }
}

/// 只取最高分类别；多个最大值时保留最先出现的
pub fn top1(probs: &[f32], labels: &[String]) -> Option<Prediction> {
  let mut best: Option<(usize, f32)> = None;
  for (index, &score) in probs.iter().enumerate() {
    match best {
      Some((_, best_score)) if score <= best_score => {}
      _ => best = Some((index, score)),
    }
  }

  best.map(|(index, score)| Prediction {
    index,
    label: label_for(labels, index),
    score,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
  }

  #[test]
  fn probabilities_pass_through_unchanged() {
    let probs = vec![0.1, 0.7, 0.2];
    let once = normalize(&probs, OutputKind::Auto);
    assert_eq!(once, probs);
    assert_eq!(normalize(&once, OutputKind::Auto), once);
  }

  #[test]
  fn sum_within_tolerance_counts_as_probabilities() {
    assert!(looks_like_probabilities(&[0.5, 0.495]));
    assert!(looks_like_probabilities(&[0.5, 0.505]));
    assert!(looks_like_probabilities(&[1.0, 0.0]));
    assert!(!looks_like_probabilities(&[0.5, 0.48]));
    assert!(!looks_like_probabilities(&[1.2, -0.2]));
  }

  #[test]
  fn logits_become_a_distribution() {
    let probs = normalize(&[2.0, -1.0, 0.5, 3.5], OutputKind::Auto);
    let sum: f32 = probs.iter().sum();
    assert!(approx(sum, 1.0));
    assert!(probs.iter().all(|&p| p >= 0.0));
    assert_eq!(top1(&probs, &[]).unwrap().index, 3);
  }

  #[test]
  fn large_logits_do_not_overflow() {
    let probs = softmax(&[1000.0, 1000.0, 999.0]);
    assert!(probs.iter().all(|p| p.is_finite()));
    assert!(approx(probs.iter().sum(), 1.0));
    assert!(approx(probs[0], probs[1]));
  }

  #[test]
  fn all_zero_logits_are_uniform() {
    let probs = normalize(&[0.0; 4], OutputKind::Auto);
    assert!(probs.iter().all(|&p| approx(p, 0.25)));
  }

  #[test]
  fn explicit_kind_skips_heuristic() {
    // 恰好和为 1 的 logits
    let raw = [0.2, 0.3, 0.5];
    let probs = normalize(&raw, OutputKind::Logits);
    assert!(!approx(probs[2], 0.5));
    assert!(approx(probs.iter().sum(), 1.0));

    let clamped = normalize(&[1.5, -0.5], OutputKind::Probabilities);
    assert_eq!(clamped, vec![1.0, 0.0]);
  }

  #[test]
  fn empty_input_yields_empty_results() {
    assert!(normalize(&[], OutputKind::Auto).is_empty());
    assert!(top_k(&[], &[], 3).is_empty());
    assert_eq!(top1(&[], &[]), None);
  }

  #[test]
  fn top1_picks_blight() {
    let labels = labels(&["healthy", "blight", "rust"]);
    let best = top1(&[0.1, 0.7, 0.2], &labels).unwrap();
    assert_eq!(best.label, "blight");
    assert_eq!(best.score, 0.7);
  }

  #[test]
  fn missing_label_is_synthesized() {
    let labels = labels(&["healthy", "blight"]);
    let best = top1(&[0.1, 0.2, 0.7], &labels).unwrap();
    assert_eq!(best.label, "class_2");

    let ranked = top_k(&[0.1, 0.2, 0.7], &labels, 3);
    assert_eq!(ranked.top1().unwrap().label, "class_2");
  }

  #[test]
  fn top_k_is_sorted_and_bounded() {
    let probs = [0.05, 0.3, 0.1, 0.3, 0.25];
    let labels = labels(&["a", "b", "c", "d", "e"]);
    for k in 0..8 {
      let ranked = top_k(&probs, &labels, k);
      assert_eq!(ranked.len(), k.min(probs.len()));
      assert!(
        ranked
          .predictions
          .windows(2)
          .all(|w| w[0].score >= w[1].score)
      );
    }
  }

  #[test]
  fn ties_keep_the_earlier_index() {
    let probs = [0.25, 0.25, 0.25, 0.25];
    let ranked = top_k(&probs, &[], 4);
    let order: Vec<_> = ranked.iter().map(|p| p.index).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_eq!(top1(&probs, &[]).unwrap().index, 0);
  }

  #[test]
  fn parses_output_kind() {
    assert_eq!("Logits".parse::<OutputKind>(), Ok(OutputKind::Logits));
    assert_eq!("softmax".parse::<OutputKind>(), Ok(OutputKind::Probabilities));
    assert!("other".parse::<OutputKind>().is_err());
  }
}
