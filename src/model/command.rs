// 该文件是 Biaoji （标记） 项目的一部分。
// src/model/command.rs - 外部 yolo 命令行后端
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

//! 通过 Ultralytics 兼容的 `yolo` 命令行完成训练与推理
//!
//! 地址格式：
//!
//! * `yolo://` 使用 `$PATH` 中的 `yolo`
//! * `yolo:///opt/venv/bin/yolo?device=cpu&workers=2` 指定可执行文件与覆盖参数
//!
//! 支持的查询参数：`device`、`workers`、`task`（默认 `detect`）。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::model::{
  Detection, ImageDetections, LoadPredictor, PredictOptions, Predictor, TrainRequest, Trainer,
};
use crate::weights::trained_weights_path;
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_PROGRAM: &str = "yolo";
const DEFAULT_TASK: &str = "detect";

#[derive(Error, Debug)]
pub enum CommandError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("查询参数 {0} 无效: {1}")]
  InvalidQuery(String, String),
  #[error("启动命令 {program} 失败: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },
  #[error("命令 {program} 执行失败，退出状态: {status}")]
  Failed { program: String, status: ExitStatus },
  #[error("I/O 错误 {0}: {1}")]
  Io(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandBackend {
  program: String,
  task: String,
  device: Option<String>,
  workers: Option<u32>,
}

impl Default for CommandBackend {
  fn default() -> Self {
    Self {
      program: DEFAULT_PROGRAM.to_string(),
      task: DEFAULT_TASK.to_string(),
      device: None,
      workers: None,
    }
  }
}

impl FromUrlWithScheme for CommandBackend {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for CommandBackend {
  type Error = CommandError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CommandError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    let program = if !path.is_empty() && path != "/" {
      path
    } else if let Some(host) = url.host_str()
      && !host.is_empty()
    {
      host.to_string()
    } else {
      DEFAULT_PROGRAM.to_string()
    };

    let mut backend = CommandBackend {
      program,
      ..Default::default()
    };
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "device" => backend.device = Some(value.into_owned()),
        "workers" => {
          let workers = value
            .parse()
            .map_err(|_| CommandError::InvalidQuery(key.to_string(), value.to_string()))?;
          backend.workers = Some(workers);
        }
        "task" => backend.task = value.into_owned(),
        _ => warn!("忽略未知的查询参数: {}={}", key, value),
      }
    }
    debug!("命令行后端: {:?}", backend);
    Ok(backend)
  }
}

impl CommandBackend {
  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn train_args(&self, request: &TrainRequest<'_>) -> Vec<String> {
    let training = request.training;
    let model = match request.init_weights {
      Some(weights) => weights.display().to_string(),
      None => training.base_model_name(),
    };
    let device = self.device.as_deref().unwrap_or(&training.device);
    let workers = self.workers.unwrap_or(training.workers);
    vec![
      self.task.clone(),
      "train".to_string(),
      format!("data={}", request.dataset_config.display()),
      format!("model={}", model),
      format!("epochs={}", training.epochs),
      format!("batch={}", training.batch_size),
      format!("imgsz={}", training.img_size),
      format!("device={}", device),
      format!("workers={}", workers),
      format!("patience={}", training.patience),
      format!("save_period={}", training.save_period),
      format!("project={}", request.model_root.display()),
      "name=train".to_string(),
      "exist_ok=True".to_string(),
    ]
  }

  fn run(&self, args: &[String]) -> Result<(), CommandError> {
    run_program(&self.program, args)
  }
}

fn run_program(program: &str, args: &[String]) -> Result<(), CommandError> {
  info!("执行命令: {} {}", program, args.join(" "));
  let status = Command::new(program)
    .args(args)
    .status()
    .map_err(|source| CommandError::Spawn {
      program: program.to_string(),
      source,
    })?;
  if !status.success() {
    return Err(CommandError::Failed {
      program: program.to_string(),
      status,
    });
  }
  Ok(())
}

impl Trainer for CommandBackend {
  type Error = CommandError;

  fn train(&self, request: &TrainRequest<'_>) -> Result<PathBuf, Self::Error> {
    std::fs::create_dir_all(request.model_root)
      .map_err(|e| CommandError::Io(request.model_root.to_path_buf(), e))?;
    let now = std::time::Instant::now();
    self.run(&self.train_args(request))?;
    info!("训练命令完成，耗时: {:.2?}", now.elapsed());
    Ok(trained_weights_path(request.model_root))
  }
}

impl LoadPredictor for CommandBackend {
  type Predictor = CommandPredictor;
  type Error = CommandError;

  fn load_predictor(&self, weights: &Path) -> Result<Self::Predictor, Self::Error> {
    if !weights.is_file() {
      return Err(CommandError::Io(
        weights.to_path_buf(),
        std::io::Error::new(std::io::ErrorKind::NotFound, "权重文件不存在"),
      ));
    }
    Ok(CommandPredictor {
      program: self.program.clone(),
      task: self.task.clone(),
      device: self.device.clone(),
      weights: weights.to_path_buf(),
    })
  }
}

/// 绑定了一份权重的推理器
#[derive(Debug, Clone)]
pub struct CommandPredictor {
  program: String,
  task: String,
  device: Option<String>,
  weights: PathBuf,
}

impl CommandPredictor {
  pub fn weights(&self) -> &Path {
    &self.weights
  }

  fn predict_args(&self, source: &Path, project: &Path, options: &PredictOptions) -> Vec<String> {
    let mut args = vec![
      self.task.clone(),
      "predict".to_string(),
      format!("model={}", self.weights.display()),
      format!("source={}", source.display()),
      format!("conf={}", options.confidence),
      format!("iou={}", options.iou),
      format!("max_det={}", options.max_det),
      "save=False".to_string(),
      "save_txt=True".to_string(),
      "save_conf=True".to_string(),
      format!("project={}", project.display()),
      "name=predict".to_string(),
      "exist_ok=True".to_string(),
    ];
    if let Some(device) = &self.device {
      args.push(format!("device={}", device));
    }
    args
  }
}

fn scratch_dir() -> PathBuf {
  let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%f");
  std::env::temp_dir().join(format!("biaoji-predict-{}-{}", std::process::id(), stamp))
}

/// 读取一张图片的预测结果文件，文件不存在表示没有检测到目标
pub fn read_prediction_file(path: &Path) -> Result<Vec<Detection>, CommandError> {
  if !path.exists() {
    return Ok(Vec::new());
  }
  let text = std::fs::read_to_string(path).map_err(|e| CommandError::Io(path.to_path_buf(), e))?;
  let mut detections = Vec::new();
  for line in text.lines().filter(|line| !line.trim().is_empty()) {
    match Detection::parse_prediction_line(line) {
      Some(detection) => detections.push(detection),
      None => warn!("跳过无法解析的预测行 {}: {:?}", path.display(), line),
    }
  }
  Ok(detections)
}

impl Predictor for CommandPredictor {
  type Error = CommandError;

  fn predict(
    &self,
    images: &[PathBuf],
    options: &PredictOptions,
  ) -> Result<Vec<ImageDetections>, Self::Error> {
    if images.is_empty() {
      return Ok(Vec::new());
    }

    let scratch = scratch_dir();
    std::fs::create_dir_all(&scratch).map_err(|e| CommandError::Io(scratch.clone(), e))?;
    let result = self.predict_in(&scratch, images, options);
    if let Err(e) = std::fs::remove_dir_all(&scratch) {
      warn!("清理临时目录 {} 失败: {}", scratch.display(), e);
    }
    result
  }
}

impl CommandPredictor {
  fn predict_in(
    &self,
    scratch: &Path,
    images: &[PathBuf],
    options: &PredictOptions,
  ) -> Result<Vec<ImageDetections>, CommandError> {
    let mut stems = HashSet::new();
    for image in images {
      if !stems.insert(image.file_stem()) {
        warn!(
          "图片 {} 与其他图片同名，预测结果会共用同一个标签文件",
          image.display()
        );
      }
    }

    let list = scratch.join("list.txt");
    let mut content = String::new();
    for image in images {
      content.push_str(&image.display().to_string());
      content.push('\n');
    }
    std::fs::write(&list, content).map_err(|e| CommandError::Io(list.clone(), e))?;

    run_program(&self.program, &self.predict_args(&list, scratch, options))?;

    let labels_dir = scratch.join("predict").join("labels");
    images
      .iter()
      .map(|image| {
        let stem = image
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
          .unwrap_or_default();
        let detections = read_prediction_file(&labels_dir.join(format!("{}.txt", stem)))?;
        Ok(ImageDetections {
          image: image.clone(),
          detections,
        })
      })
      .collect()
  }
}
