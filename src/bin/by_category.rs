// 该文件是 Biaoji （标记） 项目的一部分。
// src/bin/by_category.rs - 按类别批量训练与标注
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
use tracing::{error, info, warn};

use biaoji::{
  FromUrl,
  annotate::OutputLayout,
  args::{CommonArgs, WeightsArgs},
  logging::init_logging,
  model::CommandBackend,
  runner::{Action, CategoryRunner, RunOptions, TrainInit},
  station::{scan_pre_labeled_root, scan_raw_root},
  task::{CategoryBatchTask, Task, install_interrupt_handler},
};

const DEFAULT_RAW_ROOT: &str = "data/raw";

/// 按类别批量准备数据、训练并自动标注
///
/// 默认扫描 data/raw/ 下含 images/ 与 labels/ 的类别目录；
/// 指定 --data-root 时扫描其下含 pre_images/ 与 pre_labels/ 的类别目录。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 自定义数据根目录
  #[arg(long, value_name = "DIR")]
  pub data_root: Option<PathBuf>,

  /// 每个类别要执行的动作
  #[arg(long, value_enum, default_value_t = Action::TrainAndAnnotate)]
  pub action: Action,

  /// 已有权重时仍然重新训练
  #[arg(long)]
  pub force_train: bool,

  /// 需要训练时的初始权重
  #[arg(long, value_enum, default_value_t = TrainInit::Base)]
  pub train_init: TrainInit,

  /// 自动标注的输出布局
  #[arg(long, value_enum, default_value_t = OutputLayout::Triage)]
  pub output_layout: OutputLayout,

  /// yolo 布局下不跳过已有标签的图片
  #[arg(long)]
  pub no_skip_existing: bool,

  /// 仅标注且没有权重时不自动训练
  #[arg(long)]
  pub no_auto_train: bool,

  #[command(flatten)]
  pub weights: WeightsArgs,

  #[command(flatten)]
  pub common: CommonArgs,
}

fn main() -> Result<ExitCode> {
  let args = Args::parse();
  init_logging(args.common.log_file.as_deref())?;

  let config = args.common.load_config()?;
  let backend = CommandBackend::from_url(&args.common.backend)?;
  let sources = args.weights.sources(&config)?;

  let (categories, use_pre_prefix) = match &args.data_root {
    Some(root) => {
      info!("{}", "=".repeat(60));
      info!("自定义路径模式: {}", root.display());
      info!("{}", "=".repeat(60));
      (scan_pre_labeled_root(root)?, true)
    }
    None => {
      info!("{}", "=".repeat(60));
      info!("默认模式: {}", DEFAULT_RAW_ROOT);
      info!("{}", "=".repeat(60));
      (scan_raw_root(std::path::Path::new(DEFAULT_RAW_ROOT))?, false)
    }
  };

  if categories.is_empty() {
    if use_pre_prefix {
      warn!("没有找到有效的类别，每个类别目录需要包含 pre_images/ 与 pre_labels/");
    } else {
      warn!("没有找到有效的类别，每个类别目录需要包含 images/ 与 labels/");
    }
    return Ok(ExitCode::SUCCESS);
  }
  info!(
    "找到 {} 个类别: {:?}",
    categories.len(),
    categories.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()
  );

  let options = RunOptions {
    action: args.action,
    force_train: args.force_train,
    train_init: args.train_init,
    shared_model_root: args.weights.shared_model_root(&config),
    registry_path: Some(args.weights.registry_path(&config)),
    prefer_pretrained: args.weights.prefer_pretrained,
    output_layout: args.output_layout,
    skip_existing: !args.no_skip_existing,
    auto_train_on_missing: !args.no_auto_train,
  };
  let runner = CategoryRunner::new(&config, options, sources, &backend);

  let mut task = CategoryBatchTask::new(categories, use_pre_prefix);
  match install_interrupt_handler() {
    Ok(rx) => task = task.with_stop_signal(rx),
    Err(e) => error!("无法设置 Ctrl-C 处理: {}", e),
  }
  let results = task.run_task(&runner)?;
  results.log_summary("类别批处理汇总");

  Ok(if results.all_ok() {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(2)
  })
}
