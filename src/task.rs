// 该文件是 Shulin （树林） 项目的一部分。
// src/task.rs - 采集与检测任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  input::SourceOpener,
  model::{DetectItem, Detector},
  slot::FrameSlot,
};

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.6;
/// 默认目标类别
pub const DEFAULT_TARGET_LABEL: &str = "tree";
/// 检测结果 id 前缀
pub const DETECTION_ID_PREFIX: &str = "tree";

const CANCEL_POLL: Duration = Duration::from_millis(20);

pub trait Task: Sized {
  fn run_task(self, cancel: &CancelToken);
}

/// 协作式取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 分段睡眠，被取消时提前返回 `false`
  pub fn sleep(&self, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
      if self.is_cancelled() {
        return false;
      }
      let now = Instant::now();
      if now >= deadline {
        return true;
      }
      thread::sleep((deadline - now).min(CANCEL_POLL));
    }
  }
}

/// 发布给前端的检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub id: String,
  pub x: i32,
  pub y: i32,
  #[serde(rename = "w")]
  pub width: i32,
  #[serde(rename = "h")]
  pub height: i32,
  #[serde(rename = "conf")]
  pub confidence: f32,
}

impl Detection {
  fn from_item(id: String, item: &DetectItem) -> Self {
    let [x_min, y_min, x_max, y_max] = item.bbox;
    Self {
      id,
      x: x_min.round() as i32,
      y: y_min.round() as i32,
      width: (x_max - x_min).max(0.0).round() as i32,
      height: (y_max - y_min).max(0.0).round() as i32,
      confidence: item.score,
    }
  }
}

/// 保留目标类别且置信度达标的结果，按出现顺序编号为 `tree_1, tree_2, …`
///
/// 编号只在一次推理内有效，不跨帧跟踪。
pub fn select_targets(items: &[DetectItem], target_label: &str, confidence: f32) -> Vec<Detection> {
  items
    .iter()
    .filter(|item| item.label == target_label && item.score >= confidence)
    .enumerate()
    .map(|(i, item)| Detection::from_item(format!("{}_{}", DETECTION_ID_PREFIX, i + 1), item))
    .collect()
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      initial_backoff: Duration::from_millis(10),
      max_backoff: Duration::from_millis(500),
    }
  }
}

/// 采集循环：打开输入源，持续把最新帧写入共享槽
///
/// 打开失败时直接结束，槽保持为空；读帧失败时不发布，退避后重试。
pub struct CaptureTask {
  opener: SourceOpener,
  slot: Arc<FrameSlot>,
  config: CaptureConfig,
}

impl CaptureTask {
  pub fn new(opener: SourceOpener, slot: Arc<FrameSlot>, config: CaptureConfig) -> Self {
    Self {
      opener,
      slot,
      config,
    }
  }
}

impl Task for CaptureTask {
  fn run_task(self, cancel: &CancelToken) {
    info!("采集任务启动，正在打开输入源...");
    let mut source = match (self.opener)() {
      Ok(source) => source,
      Err(e) => {
        error!("无法打开输入源，采集任务结束: {}", e);
        return;
      }
    };
    info!("输入源已打开");

    let mut backoff = self.config.initial_backoff;
    let mut failures = 0u64;
    while !cancel.is_cancelled() {
      match source.read_frame() {
        Ok(frame) => {
          if failures > 0 {
            info!("连续 {} 次读帧失败后恢复", failures);
          }
          failures = 0;
          backoff = self.config.initial_backoff;
          self.slot.publish_frame(frame);
        }
        Err(e) => {
          failures += 1;
          if failures == 1 {
            warn!("读帧失败，{:?} 后重试: {}", backoff, e);
          } else {
            debug!("第 {} 次读帧失败: {}", failures, e);
          }
          if !cancel.sleep(backoff) {
            break;
          }
          backoff = (backoff * 2).min(self.config.max_backoff);
        }
      }
    }

    // 输入源在此释放
    drop(source);
    info!("采集任务结束，输入源已释放");
  }
}

#[derive(Debug, Clone)]
pub struct DetectionConfig {
  pub target_label: String,
  pub confidence: f32,
  /// 两次推理之间的间隔
  pub interval: Duration,
  /// 没有新帧时的等待
  pub idle_delay: Duration,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      target_label: DEFAULT_TARGET_LABEL.to_string(),
      confidence: DEFAULT_CONFIDENCE,
      interval: Duration::from_millis(100),
      idle_delay: Duration::from_millis(50),
    }
  }
}

/// 检测循环：读取最新帧、推理、过滤并发布结果
///
/// 与采集节奏解耦，检测结果可能落后显示帧若干帧。
pub struct DetectionTask {
  detector: Arc<dyn Detector>,
  slot: Arc<FrameSlot>,
  config: DetectionConfig,
}

impl DetectionTask {
  pub fn new(detector: Arc<dyn Detector>, slot: Arc<FrameSlot>, config: DetectionConfig) -> Self {
    Self {
      detector,
      slot,
      config,
    }
  }
}

impl Task for DetectionTask {
  fn run_task(self, cancel: &CancelToken) {
    info!(
      "检测任务启动: 目标 '{}', 置信度阈值 {}",
      self.config.target_label, self.config.confidence
    );

    let mut last_sequence = None;
    while !cancel.is_cancelled() {
      let snapshot = match self.slot.read_frame() {
        Some(snapshot) if Some(snapshot.sequence) != last_sequence => snapshot,
        _ => {
          if !cancel.sleep(self.config.idle_delay) {
            break;
          }
          continue;
        }
      };
      last_sequence = Some(snapshot.sequence);

      let now = Instant::now();
      match self.detector.detect(&snapshot.frame, self.config.confidence) {
        Ok(items) => {
          let detections = select_targets(&items, &self.config.target_label, self.config.confidence);
          debug!(
            "第 {} 帧推理完成，耗时: {:.2?}, {} / {} 个目标",
            snapshot.sequence,
            now.elapsed(),
            detections.len(),
            items.len()
          );
          self.slot.publish_detections(detections);
        }
        Err(e) => warn!("第 {} 帧推理失败: {}", snapshot.sequence, e),
      }

      if !cancel.sleep(self.config.interval) {
        break;
      }
    }

    info!("检测任务结束");
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use image::RgbImage;

  use super::*;
  use crate::{
    frame::Frame,
    input::{FrameSource, InputError},
    model::ModelError,
  };

  struct FlakySource {
    reads: u64,
  }

  impl FrameSource for FlakySource {
    fn read_frame(&mut self) -> Result<Frame, InputError> {
      self.reads += 1;
      if self.reads % 2 == 0 {
        Err(InputError::ReadFailed("dropped".to_string()))
      } else {
        Ok(Frame::new(RgbImage::new(8, 8), self.reads, 0))
      }
    }
  }

  struct CountingDetector {
    items: Vec<DetectItem>,
    calls: Mutex<u64>,
  }

  impl Detector for CountingDetector {
    fn detect(&self, _frame: &Frame, _confidence: f32) -> Result<Vec<DetectItem>, ModelError> {
      *self.calls.lock().unwrap() += 1;
      Ok(self.items.clone())
    }
  }

  fn raw_items() -> Vec<DetectItem> {
    vec![
      DetectItem::new("tree", 0.95, [10.0, 20.0, 40.0, 80.0]),
      DetectItem::new("person", 0.99, [0.0, 0.0, 5.0, 5.0]),
      DetectItem::new("tree", 0.59, [1.0, 1.0, 2.0, 2.0]),
      DetectItem::new("tree", 0.6, [100.4, 50.6, 120.0, 70.0]),
    ]
  }

  #[test]
  fn select_targets_filters_by_label_and_threshold() {
    let detections = select_targets(&raw_items(), "tree", 0.6);
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].id, "tree_1");
    assert_eq!(detections[1].id, "tree_2");
    assert_eq!(
      (detections[0].x, detections[0].y, detections[0].width, detections[0].height),
      (10, 20, 30, 60)
    );
    assert_eq!((detections[1].x, detections[1].y), (100, 51));
  }

  #[test]
  fn select_targets_numbers_each_pass_from_one() {
    let first = select_targets(&raw_items(), "tree", 0.6);
    let second = select_targets(&raw_items()[2..], "tree", 0.6);
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "tree_1");
  }

  #[test]
  fn detection_serializes_with_short_field_names() {
    let detection = &select_targets(&raw_items(), "tree", 0.6)[0];
    let json = serde_json::to_value(detection).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"id": "tree_1", "x": 10, "y": 20, "w": 30, "h": 60, "conf": 0.95f32})
    );
  }

  #[test]
  fn cancel_interrupts_sleep() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let now = Instant::now();
    assert!(!cancel.sleep(Duration::from_secs(5)));
    assert!(now.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn capture_skips_failed_reads_and_keeps_publishing() {
    let slot = Arc::new(FrameSlot::new());
    let opener: SourceOpener =
      Arc::new(|| Ok(Box::new(FlakySource { reads: 0 }) as Box<dyn FrameSource>));
    let task = CaptureTask::new(opener, slot.clone(), CaptureConfig::default());
    let cancel = CancelToken::new();

    let handle = {
      let cancel = cancel.clone();
      thread::spawn(move || task.run_task(&cancel))
    };
    thread::sleep(Duration::from_millis(200));
    cancel.cancel();
    handle.join().unwrap();

    let snapshot = slot.read_frame().expect("frames should be published");
    assert!(snapshot.sequence > 1);
    assert_eq!(snapshot.frame.index % 2, 1);
  }

  #[test]
  fn capture_ends_when_source_cannot_open() {
    let slot = Arc::new(FrameSlot::new());
    let opener: SourceOpener = Arc::new(|| Err(InputError::ReadFailed("no camera".to_string())));
    CaptureTask::new(opener, slot.clone(), CaptureConfig::default()).run_task(&CancelToken::new());
    assert!(slot.read_frame().is_none());
  }

  #[test]
  fn detection_runs_once_per_new_frame() {
    let slot = Arc::new(FrameSlot::new());
    slot.publish_frame(Frame::new(RgbImage::new(8, 8), 0, 0));
    let detector = Arc::new(CountingDetector {
      items: raw_items(),
      calls: Mutex::new(0),
    });
    let config = DetectionConfig {
      interval: Duration::from_millis(5),
      idle_delay: Duration::from_millis(5),
      ..DetectionConfig::default()
    };
    let task = DetectionTask::new(detector.clone(), slot.clone(), config);
    let cancel = CancelToken::new();

    let handle = {
      let cancel = cancel.clone();
      thread::spawn(move || task.run_task(&cancel))
    };
    thread::sleep(Duration::from_millis(150));
    cancel.cancel();
    handle.join().unwrap();

    assert_eq!(*detector.calls.lock().unwrap(), 1);
    let detections = slot.read_detections();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].id, "tree_1");
  }
}
