// 该文件是 Shulin （树林） 项目的一部分。
// src/lifecycle.rs - 后台任务生命周期
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

//! 采集与检测任务的生命周期
//!
//! 两个任务各自维护一个 `Stopped -> Starting -> Running -> Stopping` 状态机，
//! 只有处于 `Stopped` 时 `start` 才会启动线程，因此重复访问页面不会叠加任务。
//! `stop` 设置取消标记并等待线程退出，返回时摄像头已经释放。
//!
//! `start` 与 `stop` 由同一把过渡锁串行化；等待线程退出时不持有状态锁，
//! 因此 `status` 不会被正在进行的 `stop` 阻塞。

use std::{
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
  thread::{self, JoinHandle},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  input::SourceOpener,
  model::Detector,
  slot::FrameSlot,
  task::{CancelToken, CaptureConfig, CaptureTask, DetectionConfig, DetectionTask, Task},
};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("无法创建 {0} 线程: {1}")]
  SpawnError(&'static str, std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
  Stopped,
  Starting,
  Running,
  Stopping,
}

struct LoopHandle {
  cancel: CancelToken,
  join: JoinHandle<()>,
}

struct LoopSlot {
  name: &'static str,
  state: LoopState,
  handle: Option<LoopHandle>,
  live: Arc<AtomicUsize>,
}

impl LoopSlot {
  fn new(name: &'static str) -> Self {
    Self {
      name,
      state: LoopState::Stopped,
      handle: None,
      live: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// 仅在 `Stopped` 时启动，返回是否真正启动了线程
  fn start<T: Task + Send + 'static>(
    &mut self,
    task: impl FnOnce() -> T,
  ) -> Result<bool, LifecycleError> {
    if self.state != LoopState::Stopped {
      return Ok(false);
    }
    self.state = LoopState::Starting;

    let task = task();
    let cancel = CancelToken::new();
    let live = LiveGuard::enter(self.live.clone());
    let thread_cancel = cancel.clone();
    let spawned = thread::Builder::new()
      .name(format!("shulin-{}", self.name))
      .spawn(move || {
        let _live = live;
        task.run_task(&thread_cancel);
      });

    match spawned {
      Ok(join) => {
        self.handle = Some(LoopHandle { cancel, join });
        self.state = LoopState::Running;
        info!("{} 任务已启动", self.name);
        Ok(true)
      }
      Err(e) => {
        self.state = LoopState::Stopped;
        Err(LifecycleError::SpawnError(self.name, e))
      }
    }
  }

  /// 取出线程句柄并进入 `Stopping`，等待由调用方在锁外完成
  fn begin_stop(&mut self) -> Option<LoopHandle> {
    let handle = self.handle.take();
    if handle.is_some() {
      self.state = LoopState::Stopping;
    }
    handle
  }

  fn finish_stop(&mut self) {
    self.state = LoopState::Stopped;
  }
}

impl LoopHandle {
  fn wait(self, name: &str) {
    if self.join.join().is_err() {
      warn!("{} 任务线程异常退出", name);
    }
    info!("{} 任务已停止", name);
  }
}

/// 线程存活计数，线程退出（包括 panic）时自动减一
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
  fn enter(counter: Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter)
  }
}

impl Drop for LiveGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
  pub state: LoopState,
  /// 仍在运行的线程数；输入源打开失败后为 0 而状态仍是 `Running`
  pub live: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleStatus {
  pub capture: LoopStatus,
  pub detection: LoopStatus,
}

pub struct LifecycleController {
  slot: Arc<FrameSlot>,
  opener: SourceOpener,
  detector: Arc<dyn Detector>,
  capture_config: CaptureConfig,
  detection_config: DetectionConfig,
  capture: Mutex<LoopSlot>,
  detection: Mutex<LoopSlot>,
  transition: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LifecycleController {
  pub fn new(
    slot: Arc<FrameSlot>,
    opener: SourceOpener,
    detector: Arc<dyn Detector>,
    capture_config: CaptureConfig,
    detection_config: DetectionConfig,
  ) -> Self {
    Self {
      slot,
      opener,
      detector,
      capture_config,
      detection_config,
      capture: Mutex::new(LoopSlot::new("capture")),
      detection: Mutex::new(LoopSlot::new("detection")),
      transition: Mutex::new(()),
    }
  }

  pub fn slot(&self) -> &Arc<FrameSlot> {
    &self.slot
  }

  /// 幂等地启动采集与检测任务
  ///
  /// 与进行中的 `stop` 互斥，会等待其完成后再启动。
  pub fn start(&self) -> Result<(), LifecycleError> {
    let _transition = lock(&self.transition);
    lock(&self.capture).start(|| {
      CaptureTask::new(
        self.opener.clone(),
        self.slot.clone(),
        self.capture_config.clone(),
      )
    })?;
    lock(&self.detection).start(|| {
      DetectionTask::new(
        self.detector.clone(),
        self.slot.clone(),
        self.detection_config.clone(),
      )
    })?;
    Ok(())
  }

  /// 通知任务退出并等待，返回时输入源已释放，共享槽已清空
  ///
  /// 会阻塞至多一次循环迭代的时间。
  pub fn stop(&self) {
    let _transition = lock(&self.transition);
    let capture = lock(&self.capture).begin_stop();
    let detection = lock(&self.detection).begin_stop();

    for handle in capture.iter().chain(detection.iter()) {
      handle.cancel.cancel();
    }
    if let Some(handle) = capture {
      handle.wait("capture");
    }
    if let Some(handle) = detection {
      handle.wait("detection");
    }

    lock(&self.capture).finish_stop();
    lock(&self.detection).finish_stop();
    self.slot.clear();
  }

  pub fn status(&self) -> LifecycleStatus {
    let status = |slot: &Mutex<LoopSlot>| {
      let slot = lock(slot);
      LoopStatus {
        state: slot.state,
        live: slot.live.load(Ordering::SeqCst),
      }
    };
    LifecycleStatus {
      capture: status(&self.capture),
      detection: status(&self.detection),
    }
  }
}

impl Drop for LifecycleController {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::AtomicBool,
    time::{Duration, Instant},
  };

  use image::RgbImage;

  use super::*;
  use crate::{
    frame::Frame,
    input::{FrameSource, InputError},
    model::{DetectItem, ModelError},
  };

  struct BlankSource {
    index: u64,
  }

  impl FrameSource for BlankSource {
    fn read_frame(&mut self) -> Result<Frame, InputError> {
      thread::sleep(Duration::from_millis(5));
      self.index += 1;
      Ok(Frame::new(RgbImage::new(8, 8), self.index, 0))
    }
  }

  struct NoTrees;

  impl Detector for NoTrees {
    fn detect(&self, _frame: &Frame, _confidence: f32) -> Result<Vec<DetectItem>, ModelError> {
      Ok(Vec::new())
    }
  }

  /// 每次推理都很慢，并标记推理已开始
  struct SlowTrees {
    busy: Arc<AtomicBool>,
  }

  impl Detector for SlowTrees {
    fn detect(&self, _frame: &Frame, _confidence: f32) -> Result<Vec<DetectItem>, ModelError> {
      self.busy.store(true, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(400));
      Ok(vec![DetectItem::new("tree", 0.9, [0.0, 0.0, 4.0, 4.0])])
    }
  }

  fn controller_with(opener: SourceOpener, detector: Arc<dyn Detector>) -> LifecycleController {
    LifecycleController::new(
      Arc::new(FrameSlot::new()),
      opener,
      detector,
      CaptureConfig::default(),
      DetectionConfig {
        interval: Duration::from_millis(10),
        ..DetectionConfig::default()
      },
    )
  }

  fn controller(opener: SourceOpener) -> LifecycleController {
    controller_with(opener, Arc::new(NoTrees))
  }

  fn blank_opener() -> SourceOpener {
    Arc::new(|| Ok(Box::new(BlankSource { index: 0 }) as Box<dyn FrameSource>))
  }

  fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
      if condition() {
        return true;
      }
      thread::sleep(Duration::from_millis(10));
    }
    false
  }

  #[test]
  fn starts_lazily_and_only_once() {
    let controller = controller(blank_opener());
    assert_eq!(controller.status().capture.state, LoopState::Stopped);

    controller.start().unwrap();
    controller.start().unwrap();
    controller.start().unwrap();

    let status = controller.status();
    assert_eq!(status.capture, LoopStatus { state: LoopState::Running, live: 1 });
    assert_eq!(status.detection, LoopStatus { state: LoopState::Running, live: 1 });
    assert!(wait_until(|| controller.slot().read_frame().is_some()));
  }

  #[test]
  fn stop_then_start_leaves_exactly_one_loop_each() {
    let controller = controller(blank_opener());
    for _ in 0..3 {
      controller.start().unwrap();
      controller.stop();
      let status = controller.status();
      assert_eq!(status.capture, LoopStatus { state: LoopState::Stopped, live: 0 });
      assert_eq!(status.detection, LoopStatus { state: LoopState::Stopped, live: 0 });
    }

    controller.start().unwrap();
    controller.start().unwrap();
    let status = controller.status();
    assert_eq!(status.capture.live, 1);
    assert_eq!(status.detection.live, 1);
  }

  #[test]
  fn open_failure_keeps_state_until_explicit_stop() {
    let opener: SourceOpener = Arc::new(|| Err(InputError::ReadFailed("no camera".to_string())));
    let controller = controller(opener);
    controller.start().unwrap();

    assert!(wait_until(|| controller.status().capture.live == 0));
    assert_eq!(controller.status().capture.state, LoopState::Running);
    assert!(controller.slot().read_frame().is_none());

    controller.stop();
    assert_eq!(controller.status().capture.state, LoopState::Stopped);
  }

  #[test]
  fn status_stays_responsive_while_stop_waits_for_inference() {
    let busy = Arc::new(AtomicBool::new(false));
    let controller = Arc::new(controller_with(
      blank_opener(),
      Arc::new(SlowTrees { busy: busy.clone() }),
    ));
    controller.start().unwrap();
    assert!(wait_until(|| busy.load(Ordering::SeqCst)));

    let stopper = {
      let controller = controller.clone();
      thread::spawn(move || controller.stop())
    };

    let mut slowest = Duration::ZERO;
    let stopping = wait_until(|| {
      let now = Instant::now();
      let status = controller.status();
      slowest = slowest.max(now.elapsed());
      status.detection.state == LoopState::Stopping
    });
    assert!(stopping);
    assert!(slowest < Duration::from_millis(50), "status blocked for {:?}", slowest);

    stopper.join().unwrap();
    let status = controller.status();
    assert_eq!(status.capture, LoopStatus { state: LoopState::Stopped, live: 0 });
    assert_eq!(status.detection, LoopStatus { state: LoopState::Stopped, live: 0 });
  }

  #[test]
  fn stop_clears_frames_and_detections() {
    let busy = Arc::new(AtomicBool::new(false));
    let controller = controller_with(blank_opener(), Arc::new(SlowTrees { busy }));
    controller.start().unwrap();
    assert!(wait_until(|| !controller.slot().read_detections().is_empty()));

    controller.stop();
    assert!(controller.slot().read_frame().is_none());
    assert!(controller.slot().read_detections().is_empty());
  }

  #[test]
  fn concurrent_starts_do_not_duplicate_loops() {
    let controller = Arc::new(controller(blank_opener()));
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let controller = controller.clone();
        thread::spawn(move || controller.start().unwrap())
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let status = controller.status();
    assert_eq!(status.capture.live, 1);
    assert_eq!(status.detection.live, 1);
  }
}
