// 该文件是 Shulin （树林） 项目的一部分。
// src/output/mjpeg.rs - MJPEG 推流编码
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

use std::{borrow::Cow, convert::Infallible, sync::Arc, time::Duration};

use actix_web::web::Bytes;
use async_stream::stream;
use futures_core::Stream;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{output::OutputError, output::draw::draw_detections, slot::FrameSlot, task::Detection};

pub const MJPEG_BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Debug, Clone)]
pub struct StreamOptions {
  /// 轮询共享槽的间隔
  pub interval: Duration,
  pub jpeg_quality: u8,
  /// 是否在画面上叠加检测框
  pub overlay: bool,
}

impl Default for StreamOptions {
  fn default() -> Self {
    Self {
      interval: Duration::from_millis(33),
      jpeg_quality: 80,
      overlay: false,
    }
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, OutputError> {
  let mut jpeg = Vec::new();
  JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(image)?;
  Ok(jpeg)
}

/// 编码为一个完整的 multipart 分段
pub fn encode_part(image: &RgbImage, quality: u8) -> Result<Vec<u8>, OutputError> {
  let jpeg = encode_jpeg(image, quality)?;
  let mut part = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
  part.extend_from_slice(PART_HEADER);
  part.extend_from_slice(&jpeg);
  part.extend_from_slice(PART_TRAILER);
  Ok(part)
}

fn render_part(
  image: &RgbImage,
  detections: Option<&[Detection]>,
  quality: u8,
) -> Result<Vec<u8>, OutputError> {
  let image = match detections {
    Some(detections) if !detections.is_empty() => {
      let mut image = image.clone();
      draw_detections(&mut image, detections);
      Cow::Owned(image)
    }
    _ => Cow::Borrowed(image),
  };
  encode_part(&image, quality)
}

struct ViewerGuard;

impl Drop for ViewerGuard {
  fn drop(&mut self) {
    info!("推流观众断开");
  }
}

/// 单个观众的 MJPEG 流
///
/// 每个观众独立轮询共享槽，只在出现新帧时输出一个分段；
/// 槽为空时不输出任何内容。编码失败的帧被跳过，流本身不会结束。
/// 叠加与编码在阻塞线程池中进行，不占用异步工作线程。
pub fn mjpeg_stream(
  slot: Arc<FrameSlot>,
  options: StreamOptions,
) -> impl Stream<Item = Result<Bytes, Infallible>> + 'static {
  stream! {
    let _guard = ViewerGuard;
    info!("新的推流观众");

    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sequence = None;

    loop {
      interval.tick().await;

      let Some(snapshot) = slot.read_frame() else {
        continue;
      };
      if Some(snapshot.sequence) == last_sequence {
        continue;
      }
      last_sequence = Some(snapshot.sequence);

      let detections = options.overlay.then(|| slot.read_detections());
      let frame = snapshot.frame.clone();
      let quality = options.jpeg_quality;
      let rendered = tokio::task::spawn_blocking(move || {
        render_part(&frame.image, detections.as_deref(), quality)
      })
      .await;
      match rendered {
        Ok(Ok(part)) => {
          debug!("输出第 {} 帧, {} 字节", snapshot.sequence, part.len());
          yield Ok(Bytes::from(part));
        }
        Ok(Err(e)) => warn!("第 {} 帧编码失败，跳过: {}", snapshot.sequence, e),
        Err(e) => warn!("第 {} 帧编码任务异常，跳过: {}", snapshot.sequence, e),
      }
    }
  }
}
