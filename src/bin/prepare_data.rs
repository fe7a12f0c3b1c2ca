// 该文件是 Biaoji （标记） 项目的一部分。
// src/bin/prepare_data.rs - 划分训练集与验证集
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use biaoji::{
  args::DEFAULT_CONFIG_PATH, config::PipelineConfig, dataset::DatasetOrganizer,
  logging::init_logging,
};

/// 把 images/ 与 labels/ 划分为 YOLO 训练所需的 train/ 与 val/
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 原始数据目录（包含 images/ 与 labels/）
  #[arg(long, value_name = "DIR")]
  pub data_dir: PathBuf,

  /// 划分结果输出目录
  #[arg(long, value_name = "DIR", default_value = "./data")]
  pub output_dir: PathBuf,

  /// 验证集比例，覆盖配置文件
  #[arg(long, value_name = "RATIO")]
  pub split_ratio: Option<f64>,

  /// 随机种子，覆盖配置文件
  #[arg(long, value_name = "SEED")]
  pub seed: Option<u64>,

  /// 划分前不打乱
  #[arg(long)]
  pub no_shuffle: bool,

  /// 配置文件路径（默认 config/config.yaml，不存在时使用内置默认值）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 同时把日志追加写入该文件
  #[arg(long, value_name = "FILE")]
  pub log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
  let args = Args::parse();
  init_logging(args.log_file.as_deref())?;

  let config = match &args.config {
    Some(path) => PipelineConfig::load_or_default(path, true)?,
    None => PipelineConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH), false)?,
  };
  let validation = &config.validation;
  let split_ratio = args.split_ratio.unwrap_or(validation.split_ratio);
  let seed = args.seed.unwrap_or(validation.random_seed);
  let shuffle = validation.shuffle && !args.no_shuffle;

  info!("{}", "=".repeat(60));
  info!("数据集准备");
  info!("{}", "=".repeat(60));
  info!("原始数据目录: {}", args.data_dir.display());
  info!("输出目录: {}", args.output_dir.display());
  info!("验证集比例: {}", split_ratio);
  info!("打乱: {}", shuffle);

  let organizer = DatasetOrganizer::new(&args.output_dir);
  let counts = organizer.split_dataset_from_raw(&args.data_dir, split_ratio, shuffle, seed)?;

  info!("数据集准备完成");
  info!("  训练集: {}", counts.train);
  info!("  验证集: {}", counts.val);
  info!("  数据集描述: {}", organizer.descriptor_path().display());

  Ok(())
}
