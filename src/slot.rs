// 该文件是 Shulin （树林） 项目的一部分。
// src/slot.rs - 共享帧槽
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

//! 共享帧槽
//!
//! 采集线程写入最新帧，检测线程写入最新检测结果，推流与接口只读。
//! 槽内只保存"最新"的一份，不排队：慢读者只会看到旧数据，不会阻塞写者。
//!
//! 所有读写都在同一把互斥锁下完成，临界区内只有指针交换或 `Arc` 克隆，
//! 设备读取、推理和编码都不在锁内进行。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{frame::Frame, task::Detection};

/// 槽中某一时刻的帧
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
  /// 槽内单调递增的发布序号，输入源重启后仍然递增
  pub sequence: u64,
  pub frame: Arc<Frame>,
}

#[derive(Debug)]
struct SlotState {
  frame: Option<FrameSnapshot>,
  detections: Arc<[Detection]>,
  next_sequence: u64,
}

#[derive(Debug)]
pub struct FrameSlot {
  state: Mutex<SlotState>,
}

impl Default for FrameSlot {
  fn default() -> Self {
    Self::new()
  }
}

impl FrameSlot {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(SlotState {
        frame: None,
        detections: Arc::from(Vec::new()),
        next_sequence: 1,
      }),
    }
  }

  // 状态总是被整体替换，中毒后的数据依然完整
  fn lock(&self) -> MutexGuard<'_, SlotState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 替换当前帧，返回其发布序号
  pub fn publish_frame(&self, frame: Frame) -> u64 {
    let frame = Arc::new(frame);
    let mut state = self.lock();
    let sequence = state.next_sequence;
    state.next_sequence += 1;
    let previous = state.frame.replace(FrameSnapshot { sequence, frame });
    drop(state);
    // 旧帧在锁外释放
    drop(previous);
    sequence
  }

  /// 当前帧，尚无帧时为 `None`
  pub fn read_frame(&self) -> Option<FrameSnapshot> {
    self.lock().frame.clone()
  }

  /// 替换当前检测结果
  pub fn publish_detections(&self, detections: Vec<Detection>) {
    let detections: Arc<[Detection]> = Arc::from(detections);
    let _previous = std::mem::replace(&mut self.lock().detections, detections);
  }

  pub fn read_detections(&self) -> Arc<[Detection]> {
    self.lock().detections.clone()
  }

  /// 清空帧与检测结果，序号继续递增
  pub fn clear(&self) {
    let mut state = self.lock();
    let frame = state.frame.take();
    let detections = std::mem::replace(&mut state.detections, Arc::from(Vec::new()));
    drop(state);
    drop((frame, detections));
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use image::{Rgb, RgbImage};

  use super::*;

  fn solid_frame(value: u8, index: u64) -> Frame {
    Frame::new(RgbImage::from_pixel(32, 24, Rgb([value; 3])), index, 0)
  }

  fn tree(n: usize) -> Detection {
    Detection {
      id: format!("tree_{n}"),
      x: n as i32,
      y: 0,
      width: 1,
      height: 1,
      confidence: 0.9,
    }
  }

  #[test]
  fn empty_slot_has_no_frame_and_no_detections() {
    let slot = FrameSlot::new();
    assert!(slot.read_frame().is_none());
    assert!(slot.read_detections().is_empty());
  }

  #[test]
  fn publish_replaces_and_sequences_increase() {
    let slot = FrameSlot::new();
    let first = slot.publish_frame(solid_frame(1, 0));
    let second = slot.publish_frame(solid_frame(2, 0));
    assert!(second > first);

    let snapshot = slot.read_frame().unwrap();
    assert_eq!(snapshot.sequence, second);
    assert_eq!(snapshot.frame.image.get_pixel(0, 0), &Rgb([2, 2, 2]));
  }

  #[test]
  fn detections_are_replaced_not_accumulated() {
    let slot = FrameSlot::new();
    slot.publish_detections(vec![tree(1), tree(2), tree(3)]);
    slot.publish_detections(vec![tree(1)]);
    assert_eq!(slot.read_detections().len(), 1);
  }

  #[test]
  fn clear_empties_the_slot_but_keeps_sequencing() {
    let slot = FrameSlot::new();
    let before = slot.publish_frame(solid_frame(1, 0));
    slot.publish_detections(vec![tree(1)]);

    slot.clear();
    assert!(slot.read_frame().is_none());
    assert!(slot.read_detections().is_empty());

    let after = slot.publish_frame(solid_frame(2, 0));
    assert!(after > before);
  }

  #[test]
  fn previous_frame_is_released_when_readers_drop_it() {
    let slot = FrameSlot::new();
    slot.publish_frame(solid_frame(1, 0));
    let held = slot.read_frame().unwrap();
    slot.publish_frame(solid_frame(2, 1));

    assert_eq!(Arc::strong_count(&held.frame), 1);
    assert_eq!(held.frame.index, 0);
  }

  #[test]
  fn concurrent_readers_never_see_mixed_frames() {
    let slot = Arc::new(FrameSlot::new());

    let writer = {
      let slot = slot.clone();
      thread::spawn(move || {
        for i in 0..500u64 {
          slot.publish_frame(solid_frame((i % 251) as u8, i));
        }
      })
    };

    let readers: Vec<_> = (0..4)
      .map(|_| {
        let slot = slot.clone();
        thread::spawn(move || {
          for _ in 0..500 {
            if let Some(snapshot) = slot.read_frame() {
              let image = &snapshot.frame.image;
              let first = *image.get_pixel(0, 0);
              assert!(image.pixels().all(|p| *p == first));
              assert_eq!(first[0] as u64, snapshot.frame.index % 251);
            }
          }
        })
      })
      .collect();

    writer.join().unwrap();
    for reader in readers {
      reader.join().unwrap();
    }
  }
}
