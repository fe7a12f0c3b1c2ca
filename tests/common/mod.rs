// 该文件是 Biaoji （标记） 项目的一部分。
// tests/common/mod.rs - 集成测试公用的假后端与目录构造
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

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use biaoji::model::{
  Detection, ImageDetections, LoadPredictor, PredictOptions, Predictor, TrainRequest, Trainer,
};
use biaoji::weights::trained_weights_path;

#[derive(thiserror::Error, Debug)]
#[error("fake backend failure: {0}")]
pub struct FakeError(pub String);

/// 记录训练调用；训练时在 `<model_root>/train/weights/best.pt` 写入假权重
pub struct FakeBackend {
  pub train_calls: RefCell<Vec<Option<PathBuf>>>,
  pub loaded: RefCell<Vec<PathBuf>>,
  pub fail_training: bool,
  pub confidence: f32,
}

impl Default for FakeBackend {
  fn default() -> Self {
    Self {
      train_calls: RefCell::new(Vec::new()),
      loaded: RefCell::new(Vec::new()),
      fail_training: false,
      confidence: 0.9,
    }
  }
}

impl FakeBackend {
  pub fn with_confidence(confidence: f32) -> Self {
    Self {
      confidence,
      ..Default::default()
    }
  }

  pub fn train_count(&self) -> usize {
    self.train_calls.borrow().len()
  }
}

impl Trainer for FakeBackend {
  type Error = FakeError;

  fn train(&self, request: &TrainRequest<'_>) -> Result<PathBuf, Self::Error> {
    self
      .train_calls
      .borrow_mut()
      .push(request.init_weights.map(Path::to_path_buf));
    if self.fail_training {
      return Err(FakeError("training diverged".to_string()));
    }
    if !request.dataset_config.exists() {
      return Err(FakeError(format!(
        "missing dataset config {}",
        request.dataset_config.display()
      )));
    }
    let best = trained_weights_path(request.model_root);
    fs::create_dir_all(best.parent().unwrap()).map_err(|e| FakeError(e.to_string()))?;
    fs::write(&best, b"weights").map_err(|e| FakeError(e.to_string()))?;
    Ok(best)
  }
}

impl LoadPredictor for FakeBackend {
  type Predictor = FakePredictor;
  type Error = FakeError;

  fn load_predictor(&self, weights: &Path) -> Result<Self::Predictor, Self::Error> {
    if !weights.exists() {
      return Err(FakeError(format!("no weights at {}", weights.display())));
    }
    self.loaded.borrow_mut().push(weights.to_path_buf());
    Ok(FakePredictor {
      confidence: self.confidence,
    })
  }
}

/// 文件名含 `empty` 的图片没有检测结果，其余每张一个目标
pub struct FakePredictor {
  pub confidence: f32,
}

impl Predictor for FakePredictor {
  type Error = FakeError;

  fn predict(
    &self,
    images: &[PathBuf],
    _options: &PredictOptions,
  ) -> Result<Vec<ImageDetections>, Self::Error> {
    Ok(
      images
        .iter()
        .map(|image| {
          let stem = image.file_stem().unwrap().to_string_lossy();
          let detections = if stem.contains("empty") {
            Vec::new()
          } else {
            vec![Detection {
              class_id: 0,
              x_center: 0.5,
              y_center: 0.5,
              width: 0.2,
              height: 0.1,
              confidence: self.confidence,
            }]
          };
          ImageDetections {
            image: image.clone(),
            detections,
          }
        })
        .collect(),
    )
  }
}

pub fn touch(path: &Path) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, b"x").unwrap();
}

pub fn write(path: &Path, text: &str) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, text).unwrap();
}

/// `<dir>/<images>/<stem>.jpg` 与 `<dir>/<labels>/<stem>.txt`
pub fn labeled_pairs(dir: &Path, images: &str, labels: &str, stems: &[&str]) {
  for stem in stems {
    touch(&dir.join(images).join(format!("{}.jpg", stem)));
    write(
      &dir.join(labels).join(format!("{}.txt", stem)),
      "0 0.5 0.5 0.1 0.1\n",
    );
  }
}

pub fn unlabeled_images(dir: &Path, stems: &[&str]) {
  for stem in stems {
    touch(&dir.join(format!("{}.jpg", stem)));
  }
}

pub fn file_names(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = match fs::read_dir(dir) {
    Ok(entries) => entries
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect(),
    Err(_) => Vec::new(),
  };
  names.sort();
  names
}
