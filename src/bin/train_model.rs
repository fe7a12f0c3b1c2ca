// 该文件是 Biaoji （标记） 项目的一部分。
// src/bin/train_model.rs - 在已划分的数据集上训练模型
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

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use biaoji::{
  FromUrl,
  args::{CommonArgs, TrainingOverrides},
  category::absolute_path,
  logging::init_logging,
  model::{CommandBackend, TrainRequest, Trainer},
};

/// 使用 prepare-data 生成的数据集描述训练一次模型
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据集描述文件
  #[arg(long, value_name = "FILE", default_value = "config/dataset_config.yaml")]
  pub data: PathBuf,

  /// 训练输出目录，最优权重位于 <DIR>/train/weights/best.pt
  #[arg(long, value_name = "DIR", default_value = "models/trained")]
  pub model_root: PathBuf,

  /// 热启动权重，不指定时从基础模型开始
  #[arg(long, value_name = "FILE")]
  pub init_weights: Option<PathBuf>,

  #[command(flatten)]
  pub overrides: TrainingOverrides,

  #[command(flatten)]
  pub common: CommonArgs,
}

fn main() -> Result<ExitCode> {
  let args = Args::parse();
  init_logging(args.common.log_file.as_deref())?;

  let mut config = args.common.load_config()?;
  args.overrides.apply(&mut config.training);
  config.validate()?;
  let training = &config.training;

  if !args.data.is_file() {
    error!("数据集描述文件不存在: {}", args.data.display());
    return Ok(ExitCode::FAILURE);
  }
  let model_root = absolute_path(&args.model_root);

  info!("{}", "=".repeat(60));
  info!("模型训练");
  info!("{}", "=".repeat(60));
  info!("模型: {}{}", training.model_type, training.model_size);
  info!("训练轮数: {}", training.epochs);
  info!("批大小: {}", training.batch_size);
  info!("图片尺寸: {}", training.img_size);
  info!("设备: {}", training.device);
  info!("数据集描述: {}", args.data.display());
  match &args.init_weights {
    Some(weights) => info!("初始权重: {}", weights.display()),
    None => info!("初始权重: {}", training.base_model_name()),
  }

  let backend = CommandBackend::from_url(&args.common.backend)?;
  let request = TrainRequest {
    dataset_config: &args.data,
    model_root: &model_root,
    init_weights: args.init_weights.as_deref(),
    training,
  };

  let started = chrono::Local::now();
  info!("训练开始于 {}", started.format("%Y-%m-%d %H:%M:%S"));
  let best = match backend.train(&request) {
    Ok(best) => best,
    Err(e) => {
      error!("训练失败: {}", e);
      return Ok(ExitCode::FAILURE);
    }
  };
  let duration = chrono::Local::now() - started;

  info!("{}", "=".repeat(60));
  info!("训练完成，耗时 {} 秒", duration.num_seconds());
  info!("  模型目录: {}", model_root.display());
  info!("  最优权重: {}", best.display());
  info!("下一步可运行自动标注:");
  info!(
    "  auto-label --model \"{}\" --images \"data/unlabeled/images\"",
    best.display()
  );

  Ok(ExitCode::SUCCESS)
}
