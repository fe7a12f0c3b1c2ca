// 该文件是 Biaoji （标记） 项目的一部分。
// src/task.rs - 批处理任务
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

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::{thread, time::Duration};

use tracing::{error, info, warn};

use crate::model::{LoadPredictor, Trainer};
use crate::runner::CategoryRunner;
use crate::station::{iter_station_dirs, scan_station_categories};

pub trait Task<R>: Sized {
  type Error;
  fn run_task(self, runner: R) -> Result<BatchResults, Self::Error>;
}

/// 安装 Ctrl-C 处理：第一次中断发出停止请求，30 秒后仍未退出则强制退出
pub fn install_interrupt_handler() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，完成当前类别后退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

#[derive(Default, Debug)]
struct StopSignal {
  rx: Option<Receiver<()>>,
  stopped: bool,
}

impl StopSignal {
  fn requested(&mut self) -> bool {
    if !self.stopped
      && let Some(rx) = &self.rx
      && rx.try_recv().is_ok()
    {
      warn!("中断信号接收，跳过剩余类别");
      self.stopped = true;
    }
    self.stopped
  }
}

/// 按处理顺序记录的每个类别的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResults {
  entries: Vec<(String, bool)>,
  interrupted: bool,
}

impl BatchResults {
  /// 同名条目覆盖之前的结果
  pub fn insert(&mut self, key: impl Into<String>, ok: bool) {
    let key = key.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = ok,
      None => self.entries.push((key, ok)),
    }
  }

  pub fn get(&self, key: &str) -> Option<bool> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, ok)| *ok)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
    self.entries.iter().map(|(k, ok)| (k.as_str(), *ok))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn successful(&self) -> usize {
    self.entries.iter().filter(|(_, ok)| *ok).count()
  }

  pub fn failed(&self) -> usize {
    self.len() - self.successful()
  }

  pub fn interrupted(&self) -> bool {
    self.interrupted
  }

  pub fn all_ok(&self) -> bool {
    self.failed() == 0
  }

  pub fn log_summary(&self, title: &str) {
    info!("{}", "=".repeat(60));
    info!("{}", title);
    info!("{}", "=".repeat(60));
    info!("总数: {}", self.len());
    info!("成功: {}", self.successful());
    info!("失败: {}", self.failed());
    for (key, ok) in self.iter() {
      if ok {
        info!("  [OK] {}", key);
      } else {
        warn!("  [FAIL] {}", key);
      }
    }
    if self.interrupted {
      warn!("任务被中断，部分类别未处理");
    }
  }
}

/// 依次处理一组类别目录
#[derive(Debug)]
pub struct CategoryBatchTask {
  categories: Vec<(String, PathBuf)>,
  use_pre_prefix: bool,
  stop: StopSignal,
}

impl CategoryBatchTask {
  pub fn new(mut categories: Vec<(String, PathBuf)>, use_pre_prefix: bool) -> Self {
    categories.sort();
    Self {
      categories,
      use_pre_prefix,
      stop: StopSignal::default(),
    }
  }

  pub fn with_stop_signal(mut self, rx: Receiver<()>) -> Self {
    self.stop.rx = Some(rx);
    self
  }
}

impl<'r, 'a, B: Trainer + LoadPredictor> Task<&'r CategoryRunner<'a, B>> for CategoryBatchTask {
  type Error = anyhow::Error;

  fn run_task(mut self, runner: &'r CategoryRunner<'a, B>) -> Result<BatchResults, Self::Error> {
    info!("开始任务，共 {} 个类别...", self.categories.len());
    let mut results = BatchResults::default();
    for (name, root) in &self.categories {
      if self.stop.requested() {
        results.interrupted = true;
        break;
      }
      let now = std::time::Instant::now();
      let ok = runner.process_category(name, root, self.use_pre_prefix);
      info!("[{}] 耗时: {:.2?}", name, now.elapsed());
      results.insert(name.clone(), ok);
    }
    info!("任务完成，退出");
    Ok(results)
  }
}

/// 扫描站点根目录并处理每个站点下的类别
#[derive(Debug)]
pub struct StationBatchTask {
  stations_root: PathBuf,
  stations: BTreeSet<String>,
  categories: BTreeSet<String>,
  stop: StopSignal,
}

impl StationBatchTask {
  pub fn new(stations_root: impl Into<PathBuf>) -> Self {
    Self {
      stations_root: stations_root.into(),
      stations: BTreeSet::new(),
      categories: BTreeSet::new(),
      stop: StopSignal::default(),
    }
  }

  /// 只处理指定名称的站点，为空时处理全部
  pub fn with_stations(mut self, stations: impl IntoIterator<Item = String>) -> Self {
    self.stations = stations.into_iter().collect();
    self
  }

  /// 只处理指定名称的类别，为空时处理全部
  pub fn with_categories(mut self, categories: impl IntoIterator<Item = String>) -> Self {
    self.categories = categories.into_iter().collect();
    self
  }

  pub fn with_stop_signal(mut self, rx: Receiver<()>) -> Self {
    self.stop.rx = Some(rx);
    self
  }

  fn selected_stations(&self) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut dirs = iter_station_dirs(&self.stations_root)?;
    if !self.stations.is_empty() {
      dirs.retain(|dir| {
        dir
          .file_name()
          .is_some_and(|n| self.stations.contains(&*n.to_string_lossy()))
      });
      let found: BTreeSet<String> = dirs
        .iter()
        .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
      let missing: Vec<&String> = self.stations.difference(&found).collect();
      if !missing.is_empty() {
        warn!("站点根目录下未找到这些站点: {:?}", missing);
      }
    }
    Ok(dirs)
  }
}

impl<'r, 'a, B: Trainer + LoadPredictor> Task<&'r CategoryRunner<'a, B>> for StationBatchTask {
  type Error = anyhow::Error;

  fn run_task(mut self, runner: &'r CategoryRunner<'a, B>) -> Result<BatchResults, Self::Error> {
    let station_dirs = self.selected_stations()?;
    info!(
      "开始任务，站点根目录: {}，共 {} 个站点",
      self.stations_root.display(),
      station_dirs.len()
    );

    let mut results = BatchResults::default();
    'stations: for station_dir in &station_dirs {
      let station_name = station_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
      info!("{}", "#".repeat(60));
      info!("站点: {}", station_name);
      info!("{}", "#".repeat(60));

      let mut entries = match scan_station_categories(station_dir, None) {
        Ok(entries) => entries,
        Err(e) => {
          error!("[{}] 扫描站点失败: {}", station_name, e);
          results.insert(station_name, false);
          continue;
        }
      };
      if !self.categories.is_empty() {
        entries.retain(|entry| self.categories.contains(&entry.category_name));
      }
      if entries.is_empty() {
        warn!("[{}] 没有找到类别", station_name);
        continue;
      }
      info!(
        "[{}] 找到 {} 个类别: {:?}",
        station_name,
        entries.len(),
        entries
          .iter()
          .map(|e| e.category_name.as_str())
          .collect::<Vec<_>>()
      );

      for entry in &entries {
        if self.stop.requested() {
          results.interrupted = true;
          break 'stations;
        }
        let ok = runner.process_station_entry(entry);
        results.insert(
          format!("{}/{}", entry.station_name, entry.category_name),
          ok,
        );
      }
    }
    info!("任务完成，退出");
    Ok(results)
  }
}
