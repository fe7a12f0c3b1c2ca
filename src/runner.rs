// 该文件是 Biaoji （标记） 项目的一部分。
// src/runner.rs - 单个类别的处理流程
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

//! # 类别处理流程
//!
//! 一个类别依次经过：
//!
//! ```text
//! NotStarted -> DatasetPrepared -> Trained -> Annotated
//!      \______________________________^          （复用已有权重时跳过训练）
//! ```
//!
//! 任何一步出错都只影响当前类别，错误在类别边界上记录并转换为 `false`。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::annotate::{AnnotateError, AutoAnnotator, OutputLayout, YoloOptions};
use crate::category::{CategoryIo, absolute_path, build_category_io};
use crate::config::{PipelineConfig, ValidationConfig};
use crate::dataset::{DatasetError, DatasetOrganizer, SplitCounts};
use crate::model::{LoadPredictor, TrainRequest, Trainer};
use crate::registry::{RegistryError, WeightsMap, update_registry_for_category};
use crate::station::{Layout, StationCategory, has_pre_labeled};
use crate::weights::{Provenance, ResolvedWeights, WeightsSources, resolve_weights};

#[derive(Error, Debug)]
pub enum RunnerError {
  #[error("原始数据目录不存在: {0}")]
  MissingRawDirectory(PathBuf),
  #[error(
    "[{category}] 没有可用的权重 (来源: {provenance})；请通过 --shared-model-root、--registry、--model-map、--pretrained-root 或 --pretrained-model 提供权重，或使用 --action train_and_annotate"
  )]
  NoUsableWeights {
    category: String,
    provenance: Provenance,
  },
  #[error("训练完成但未找到权重文件: {0}")]
  WeightsNotProduced(PathBuf),
  #[error("数据集错误: {0}")]
  Dataset(#[from] DatasetError),
  #[error("登记表错误: {0}")]
  Registry(#[from] RegistryError),
  #[error("自动标注错误: {0}")]
  Annotate(#[from] AnnotateError),
  #[error("训练失败: {0}")]
  Train(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("加载推理模型失败: {0}")]
  LoadPredictor(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("I/O 错误 {0}: {1}")]
  Io(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
  Train,
  Annotate,
  #[value(name = "train_and_annotate")]
  TrainAndAnnotate,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Train => "train",
      Action::Annotate => "annotate",
      Action::TrainAndAnnotate => "train_and_annotate",
    }
  }

  pub fn trains(&self) -> bool {
    matches!(self, Action::Train | Action::TrainAndAnnotate)
  }

  pub fn annotates(&self) -> bool {
    matches!(self, Action::Annotate | Action::TrainAndAnnotate)
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Action {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "train" => Ok(Action::Train),
      "annotate" => Ok(Action::Annotate),
      "train_and_annotate" => Ok(Action::TrainAndAnnotate),
      other => Err(format!("未知的动作: {}", other)),
    }
  }
}

/// 训练的初始权重
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TrainInit {
  /// 从基础模型开始
  #[default]
  Base,
  /// 以解析到的已有权重热启动
  Reuse,
}

impl fmt::Display for TrainInit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      TrainInit::Base => "base",
      TrainInit::Reuse => "reuse",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryState {
  NotStarted,
  DatasetPrepared,
  /// 已有可用权重（训练得到或复用）
  Trained,
  Annotated,
  Failed,
}

impl fmt::Display for CategoryState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CategoryState::NotStarted => "not_started",
      CategoryState::DatasetPrepared => "dataset_prepared",
      CategoryState::Trained => "trained",
      CategoryState::Annotated => "annotated",
      CategoryState::Failed => "failed",
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOutcome {
  pub state: CategoryState,
  pub weights: Option<PathBuf>,
}

impl CategoryOutcome {
  pub fn failed() -> Self {
    Self {
      state: CategoryState::Failed,
      weights: None,
    }
  }

  pub fn is_success(&self) -> bool {
    self.state != CategoryState::Failed
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
  pub action: Action,
  pub force_train: bool,
  pub train_init: TrainInit,
  pub shared_model_root: Option<PathBuf>,
  /// 训练成功后写回的登记表，每次解析前重新读取
  pub registry_path: Option<PathBuf>,
  pub prefer_pretrained: bool,
  pub output_layout: OutputLayout,
  pub skip_existing: bool,
  /// 仅标注且没有权重时，若存在已标注数据则先训练一次
  pub auto_train_on_missing: bool,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      action: Action::TrainAndAnnotate,
      force_train: false,
      train_init: TrainInit::Base,
      shared_model_root: None,
      registry_path: None,
      prefer_pretrained: false,
      output_layout: OutputLayout::Triage,
      skip_existing: true,
      auto_train_on_missing: true,
    }
  }
}

/// 按验证参数划分数据集，并把生成的数据集描述复制到类别目录
pub fn prepare_dataset(
  io: &CategoryIo,
  validation: &ValidationConfig,
) -> Result<SplitCounts, RunnerError> {
  let organizer = DatasetOrganizer::new(&io.data_root);
  let counts = organizer.split_dataset(
    &io.raw_images_dir,
    &io.raw_labels_dir,
    validation.split_ratio,
    validation.shuffle,
    validation.random_seed,
  )?;
  info!(
    "[{}] 数据集已准备: 训练集 {}，验证集 {}",
    io.category_name, counts.train, counts.val
  );

  let generated = organizer.descriptor_path();
  if generated.exists() && generated != io.dataset_config_path {
    std::fs::copy(&generated, &io.dataset_config_path)
      .map_err(|e| RunnerError::Io(io.dataset_config_path.clone(), e))?;
  }
  Ok(counts)
}

pub struct CategoryRunner<'a, B> {
  config: &'a PipelineConfig,
  options: RunOptions,
  sources: WeightsSources,
  backend: &'a B,
}

impl<'a, B> CategoryRunner<'a, B>
where
  B: Trainer + LoadPredictor,
{
  /// `sources` 中的登记表会在每次解析前按 `options.registry_path` 重新读取
  pub fn new(
    config: &'a PipelineConfig,
    options: RunOptions,
    sources: WeightsSources,
    backend: &'a B,
  ) -> Self {
    Self {
      config,
      options,
      sources,
      backend,
    }
  }

  pub fn options(&self) -> &RunOptions {
    &self.options
  }

  fn current_sources(&self) -> Result<WeightsSources, RunnerError> {
    let mut sources = self.sources.clone();
    if let Some(path) = &self.options.registry_path {
      sources.registry = Some(WeightsMap::load(path)?);
    }
    Ok(sources)
  }

  pub fn resolve(&self, category: &str, model_root: &Path) -> Result<ResolvedWeights, RunnerError> {
    let sources = self.current_sources()?;
    Ok(resolve_weights(
      category,
      model_root,
      &sources,
      self.options.prefer_pretrained,
    ))
  }

  fn register(&self, category: &str, weights: &Path) -> Result<(), RunnerError> {
    if let Some(path) = &self.options.registry_path {
      update_registry_for_category(path, category, weights)?;
    }
    Ok(())
  }

  pub fn train_model(
    &self,
    io: &CategoryIo,
    init_weights: Option<&Path>,
  ) -> Result<PathBuf, RunnerError> {
    std::fs::create_dir_all(&io.model_root).map_err(|e| RunnerError::Io(io.model_root.clone(), e))?;
    let request = TrainRequest {
      dataset_config: &io.dataset_config_path,
      model_root: &io.model_root,
      init_weights,
      training: &self.config.training,
    };
    let best = self
      .backend
      .train(&request)
      .map_err(|e| RunnerError::Train(Box::new(e)))?;
    if !best.is_file() {
      return Err(RunnerError::WeightsNotProduced(best));
    }
    info!("[{}] 最优权重: {}", io.category_name, best.display());
    Ok(best)
  }

  fn prepare_and_train(
    &self,
    io: &CategoryIo,
    init_weights: Option<&Path>,
    state: &mut CategoryState,
  ) -> Result<PathBuf, RunnerError> {
    info!("[{}] 步骤 1: 准备数据集", io.category_name);
    prepare_dataset(io, &self.config.validation)?;
    *state = CategoryState::DatasetPrepared;

    info!("[{}] 步骤 2: 训练模型", io.category_name);
    let best = self.train_model(io, init_weights)?;
    *state = CategoryState::Trained;
    self.register(&io.category_name, &best)?;
    Ok(best)
  }

  /// 标注类别的待标注图片，目录不存在时跳过并返回 `false`
  pub fn auto_annotate(&self, io: &CategoryIo, weights: &Path) -> Result<bool, RunnerError> {
    let Some(unlabeled) = io.unlabeled_dir_if_exists() else {
      info!("[{}] 没有待标注数据，跳过自动标注", io.category_name);
      return Ok(false);
    };

    let predictor = self
      .backend
      .load_predictor(weights)
      .map_err(|e| RunnerError::LoadPredictor(Box::new(e)))?;
    let annotator =
      AutoAnnotator::new(predictor, &self.config.auto_annotation).with_weights(weights);

    match self.options.output_layout {
      OutputLayout::Triage => {
        let counts = annotator.annotate_images(unlabeled, &io.output_root)?;
        info!("[{}] 自动标注完成: {}", io.category_name, counts);
      }
      OutputLayout::Yolo => {
        let options = YoloOptions {
          skip_existing: self.options.skip_existing,
          write_empty: true,
          report_path: None,
        }
        .with_default_report(&io.output_root);
        let report = annotator.annotate_images_yolo(unlabeled, &io.output_root, &options)?;
        info!("[{}] 自动标注完成: {}", io.category_name, report.buckets());
      }
    }
    Ok(true)
  }

  /// 按当前动作处理一个类别
  pub fn run_category(
    &self,
    name: &str,
    root: &Path,
    use_pre_prefix: bool,
  ) -> Result<CategoryOutcome, RunnerError> {
    self.run_category_with(name, root, use_pre_prefix, self.options.action)
  }

  fn run_category_with(
    &self,
    name: &str,
    root: &Path,
    use_pre_prefix: bool,
    action: Action,
  ) -> Result<CategoryOutcome, RunnerError> {
    info!("类别目录: {}，动作: {}", root.display(), action);
    let io = build_category_io(
      name,
      root,
      use_pre_prefix,
      self.options.shared_model_root.as_deref(),
    );

    if action.trains() {
      for dir in [&io.raw_images_dir, &io.raw_labels_dir] {
        if !dir.is_dir() {
          return Err(RunnerError::MissingRawDirectory(dir.clone()));
        }
      }
    }

    let mut state = CategoryState::NotStarted;
    let mut weights: Option<PathBuf> = None;

    if action.trains() {
      let existing = self.resolve(name, &io.model_root)?;
      match &existing.path {
        Some(path) if existing.provenance.is_reusable_training_output() && !self.options.force_train => {
          info!("[{}] 复用已有权重，跳过训练: {}", name, path.display());
          state = CategoryState::Trained;
          weights = Some(path.clone());
        }
        _ => {
          let init = match (self.options.train_init, existing.path.as_deref()) {
            (TrainInit::Reuse, Some(path)) => {
              info!(
                "[{}] 训练初始权重: {} (来源: {})",
                name,
                path.display(),
                existing.provenance
              );
              Some(path)
            }
            _ => None,
          };
          weights = Some(self.prepare_and_train(&io, init, &mut state)?);
        }
      }
    }

    if action.annotates() {
      let weights_path = match weights.take() {
        Some(path) => path,
        None => {
          let resolved = self.resolve(name, &io.model_root)?;
          match resolved.path {
            Some(path) => {
              info!(
                "[{}] 使用 {} 权重: {}",
                name,
                resolved.provenance,
                path.display()
              );
              state = CategoryState::Trained;
              path
            }
            None if action == Action::Annotate
              && self.options.auto_train_on_missing
              && io.has_labeled_data() =>
            {
              warn!(
                "[{}] 没有可用于标注的权重 (来源: {})，发现已标注数据，先训练一个模型",
                name,
                resolved.provenance
              );
              self.prepare_and_train(&io, None, &mut state)?
            }
            None => {
              return Err(RunnerError::NoUsableWeights {
                category: name.to_string(),
                provenance: resolved.provenance,
              });
            }
          }
        }
      };

      info!("[{}] 步骤 3: 自动标注待标注数据", name);
      if self.auto_annotate(&io, &weights_path)? {
        state = CategoryState::Annotated;
      }
      weights = Some(weights_path);
    }

    Ok(CategoryOutcome { state, weights })
  }

  /// 处理一个类别，所有错误都在此处记录并返回 `false`
  pub fn process_category(&self, name: &str, root: &Path, use_pre_prefix: bool) -> bool {
    let span = info_span!("category", name = %name);
    let _guard = span.enter();
    let outcome = self.finish(name, self.run_category(name, root, use_pre_prefix));
    outcome.is_success()
  }

  fn finish(&self, name: &str, result: Result<CategoryOutcome, RunnerError>) -> CategoryOutcome {
    match result {
      Ok(outcome) => {
        info!("[{}] [OK] 类别处理完成 ({})", name, outcome.state);
        outcome
      }
      Err(e) => {
        error!("[{}] [FAIL] 类别处理失败: {}", name, e);
        CategoryOutcome::failed()
      }
    }
  }

  /// 处理站点扫描得到的一个条目
  ///
  /// 没有 `pre_images/` 与 `pre_labels/` 时训练动作降级为仅标注；
  /// 散放图片的目录直接在原地标注到 `<dir>/labels`。
  pub fn process_station_entry(&self, entry: &StationCategory) -> bool {
    let span = info_span!(
      "category",
      station = %entry.station_name,
      name = %entry.category_name
    );
    let _guard = span.enter();
    let key = format!("{}/{}", entry.station_name, entry.category_name);

    let mut action = self.options.action;
    if action.trains() && !has_pre_labeled(&entry.category_dir) {
      info!("[{}] 没有 pre_images/pre_labels，动作降级为 annotate", key);
      action = Action::Annotate;
    }

    let result = match entry.layout {
      Layout::DirImages | Layout::PreLabeled => {
        self.run_category_with(&entry.category_name, &entry.category_dir, true, action)
      }
      Layout::FlatImages => self.annotate_flat_images(entry),
    };
    self.finish(&key, result).is_success()
  }

  fn annotate_flat_images(&self, entry: &StationCategory) -> Result<CategoryOutcome, RunnerError> {
    let name = &entry.category_name;
    let model_root = match &self.options.shared_model_root {
      Some(shared) => absolute_path(shared).join(name),
      None => absolute_path(&entry.category_dir.join("models")),
    };
    let resolved = self.resolve(name, &model_root)?;
    let Some(weights) = resolved.path else {
      return Err(RunnerError::NoUsableWeights {
        category: name.clone(),
        provenance: resolved.provenance,
      });
    };

    let labels_dir = entry.category_dir.join("labels");
    info!(
      "[{}/{}] 散放图片 -> 标签目录: {}",
      entry.station_name,
      name,
      labels_dir.display()
    );
    let predictor = self
      .backend
      .load_predictor(&weights)
      .map_err(|e| RunnerError::LoadPredictor(Box::new(e)))?;
    let options = YoloOptions {
      skip_existing: self.options.skip_existing,
      write_empty: true,
      report_path: None,
    }
    .with_default_report(&labels_dir);
    AutoAnnotator::new(predictor, &self.config.auto_annotation)
      .with_weights(&weights)
      .annotate_images_yolo(&entry.category_dir, &labels_dir, &options)?;

    Ok(CategoryOutcome {
      state: CategoryState::Annotated,
      weights: Some(weights),
    })
  }
}
