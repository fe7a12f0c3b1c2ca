// 该文件是 Biaoji （标记） 项目的一部分。
// src/bin/by_station.rs - 按站点批量标注与训练
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

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use biaoji::{
  FromUrl,
  annotate::OutputLayout,
  args::{CommonArgs, WeightsArgs},
  category::absolute_path,
  logging::init_logging,
  model::CommandBackend,
  runner::{Action, CategoryRunner, RunOptions, TrainInit},
  task::{StationBatchTask, Task, install_interrupt_handler},
};

const DEFAULT_SHARED_MODEL_ROOT: &str = "models/shared";
const LEGACY_TRAINED_ROOT: &str = "models/trained";

/// 处理站点目录：扫描每个站点下的类别并逐个训练或标注
///
/// 站点可以随时加入根目录，已训练的类别模型通过共享模型目录与登记表跨站点复用。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 包含各个站点子目录的根目录
  #[arg(long, value_name = "DIR")]
  pub stations_root: PathBuf,

  /// 只处理这些站点，可重复指定
  #[arg(long, value_name = "NAME")]
  pub station: Vec<String>,

  /// 只处理这些类别，可重复指定
  #[arg(long, value_name = "NAME")]
  pub category: Vec<String>,

  /// 每个类别要执行的动作
  #[arg(long, value_enum, default_value_t = Action::Annotate)]
  pub action: Action,

  /// 已有权重时仍然重新训练
  #[arg(long)]
  pub force_train: bool,

  /// 需要训练时的初始权重
  #[arg(long, value_enum, default_value_t = TrainInit::Reuse)]
  pub train_init: TrainInit,

  /// 自动标注的输出布局
  #[arg(long, value_enum, default_value_t = OutputLayout::Yolo)]
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

/// 未显式指定共享模型目录且默认目录不存在时，回退到旧的训练输出目录
fn effective_shared_model_root(explicit: Option<PathBuf>) -> PathBuf {
  if let Some(root) = explicit {
    return root;
  }
  let default = PathBuf::from(DEFAULT_SHARED_MODEL_ROOT);
  let legacy = Path::new(LEGACY_TRAINED_ROOT);
  if !default.exists() && legacy.exists() {
    warn!(
      "共享模型目录 {} 不存在，回退到旧的训练目录 {}",
      default.display(),
      legacy.display()
    );
    return legacy.to_path_buf();
  }
  default
}

fn main() -> Result<ExitCode> {
  let args = Args::parse();
  init_logging(args.common.log_file.as_deref())?;

  let config = args.common.load_config()?;
  let backend = CommandBackend::from_url(&args.common.backend)?;
  let sources = args.weights.sources(&config)?;

  let stations_root = std::fs::canonicalize(&args.stations_root).map_err(|e| {
    anyhow::anyhow!("站点根目录不存在: {} ({})", args.stations_root.display(), e)
  })?;
  let shared_model_root =
    effective_shared_model_root(args.weights.shared_model_root(&config));

  info!("{}", "=".repeat(60));
  info!("站点模式");
  info!("{}", "=".repeat(60));
  info!("站点根目录: {}", stations_root.display());
  info!("动作: {}", args.action);
  info!("共享模型目录: {}", absolute_path(&shared_model_root).display());
  info!("输出布局: {}", args.output_layout);

  let options = RunOptions {
    action: args.action,
    force_train: args.force_train,
    train_init: args.train_init,
    shared_model_root: Some(shared_model_root),
    registry_path: Some(args.weights.registry_path(&config)),
    prefer_pretrained: args.weights.prefer_pretrained,
    output_layout: args.output_layout,
    skip_existing: !args.no_skip_existing,
    auto_train_on_missing: !args.no_auto_train,
  };
  let runner = CategoryRunner::new(&config, options, sources, &backend);

  let mut task = StationBatchTask::new(stations_root)
    .with_stations(args.station)
    .with_categories(args.category);
  match install_interrupt_handler() {
    Ok(rx) => task = task.with_stop_signal(rx),
    Err(e) => error!("无法设置 Ctrl-C 处理: {}", e),
  }
  let results = task.run_task(&runner)?;
  results.log_summary("站点批处理汇总");

  Ok(if results.all_ok() {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(2)
  })
}
