// 该文件是 Biaoji （标记） 项目的一部分。
// src/bin/auto_label.rs - 使用已训练模型自动标注
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
  annotate::{AutoAnnotator, OutputLayout, STATISTICS_FILE, YoloOptions},
  args::{CommonArgs, DEFAULT_REGISTRY_PATH},
  logging::init_logging,
  model::{CommandBackend, LoadPredictor},
  registry::WeightsMap,
};

/// 使用已训练的模型为图片生成标签
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group = clap::ArgGroup::new("weights").required(true).args(["model", "category"]))]
pub struct Args {
  /// 权重文件路径（.pt）
  #[arg(long, value_name = "FILE")]
  pub model: Option<PathBuf>,

  /// 从登记表中按类别名解析权重
  #[arg(long, value_name = "NAME")]
  pub category: Option<String>,

  /// 使用 --category 时读取的登记表
  #[arg(long, value_name = "FILE")]
  pub registry: Option<PathBuf>,

  /// 待标注图片目录
  #[arg(long, value_name = "DIR")]
  pub images: PathBuf,

  /// 标签输出目录
  #[arg(long, value_name = "DIR", default_value = "output/predictions")]
  pub output: PathBuf,

  /// 输出布局
  #[arg(long, value_enum, default_value_t = OutputLayout::Triage)]
  pub output_layout: OutputLayout,

  /// yolo 布局下不跳过已有标签的图片
  #[arg(long)]
  pub no_skip_existing: bool,

  /// 置信度阈值，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub conf_threshold: Option<f32>,

  #[command(flatten)]
  pub common: CommonArgs,
}

fn percent(part: usize, total: usize) -> f64 {
  if total == 0 {
    0.0
  } else {
    part as f64 * 100.0 / total as f64
  }
}

fn main() -> Result<ExitCode> {
  let args = Args::parse();
  init_logging(args.common.log_file.as_deref())?;

  let mut config = args.common.load_config()?;
  if let Some(threshold) = args.conf_threshold {
    config.auto_annotation.confidence_threshold = threshold;
    config.validate()?;
  }

  let weights = match (&args.model, &args.category) {
    (Some(model), _) => model.clone(),
    (None, category) => {
      let category = category
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("需要指定 --model 或 --category"))?;
      let registry_path = args
        .registry
        .clone()
        .or_else(|| config.paths.registry.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH));
      let registry = WeightsMap::load(&registry_path)?;
      match registry.resolve(category) {
        Some(path) => path,
        None => {
          error!(
            "登记表 {} 中没有类别 {} 的可用模型",
            registry_path.display(),
            category
          );
          return Ok(ExitCode::FAILURE);
        }
      }
    }
  };

  info!("{}", "=".repeat(60));
  info!("自动标注");
  info!("{}", "=".repeat(60));
  info!("模型: {}", weights.display());
  info!("图片: {}", args.images.display());
  info!("输出: {}", args.output.display());
  info!("输出布局: {}", args.output_layout);
  info!("置信度阈值: {}", config.auto_annotation.confidence_threshold);
  info!("复核阈值: {}", config.auto_annotation.review_threshold);

  let backend = CommandBackend::from_url(&args.common.backend)?;
  let predictor = backend.load_predictor(&weights)?;
  let annotator = AutoAnnotator::new(predictor, &config.auto_annotation).with_weights(&weights);

  let started = chrono::Local::now();
  let counts = match args.output_layout {
    OutputLayout::Yolo => {
      let options = YoloOptions {
        skip_existing: !args.no_skip_existing,
        write_empty: true,
        report_path: None,
      }
      .with_default_report(&args.output);
      annotator
        .annotate_images_yolo(&args.images, &args.output, &options)?
        .buckets()
    }
    OutputLayout::Triage => annotator.annotate_images(&args.images, &args.output)?,
  };
  let duration = chrono::Local::now() - started;

  info!("{}", "=".repeat(60));
  info!("自动标注完成，耗时 {} 秒", duration.num_seconds());
  info!("  图片总数: {}", counts.total);
  info!(
    "  高置信度 (>=0.7): {} ({:.1}%)",
    counts.high_conf,
    percent(counts.high_conf, counts.total)
  );
  info!(
    "  中置信度: {} ({:.1}%)",
    counts.medium_conf,
    percent(counts.medium_conf, counts.total)
  );
  info!(
    "  低置信度 (需复核): {} ({:.1}%)",
    counts.low_conf,
    percent(counts.low_conf, counts.total)
  );
  match args.output_layout {
    OutputLayout::Yolo => info!("标签保存在 {}/*.txt", args.output.display()),
    OutputLayout::Triage => {
      info!("标签保存在 {}/labels/{{high_conf,medium_conf,low_conf}}/", args.output.display());
      info!("统计保存在 {}", args.output.join(STATISTICS_FILE).display());
    }
  }

  Ok(ExitCode::SUCCESS)
}
