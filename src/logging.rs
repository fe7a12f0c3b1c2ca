// 该文件是 Biaoji （标记） 项目的一部分。
// src/logging.rs - 日志初始化
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

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Error, Debug)]
pub enum LoggingError {
  #[error("打开日志文件 {0} 失败: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("日志初始化失败: {0}")]
  Init(#[from] tracing_subscriber::util::TryInitError),
}

/// 初始化日志：终端输出到 stderr，指定文件时同时追加写入该文件
///
/// 日志级别由 `RUST_LOG` 控制，默认 `info`。
pub fn init_logging(log_file: Option<&Path>) -> Result<(), LoggingError> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let file_layer = match log_file {
    Some(path) => {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent).map_err(|e| LoggingError::Io(parent.to_path_buf(), e))?;
      }
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::Io(path.to_path_buf(), e))?;
      Some(
        fmt::layer()
          .with_writer(Mutex::new(file))
          .with_ansi(false),
      )
    }
    None => None,
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .try_init()?;
  Ok(())
}
