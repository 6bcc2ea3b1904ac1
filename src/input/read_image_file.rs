// 该文件是 Shulin （树林） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::time::{Duration, Instant};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, InputError},
  query_param,
};

const DEFAULT_FPS: f64 = 10.0;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 把一张静态图片当作摄像头反复输出
///
/// `image:///path/to/file.jpg?fps=10`
pub struct ImageFileInput {
  image: RgbImage,
  interval: Duration,
  frame_index: u64,
  start_time: Instant,
  next_due: Instant,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let image = ImageReader::open(url.path())?.decode()?;
    let fps = query_param(url, "fps")
      .filter(|fps: &f64| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    Ok(Self::new(image.into(), fps))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, fps: f64) -> Self {
    let now = Instant::now();
    Self {
      image,
      interval: Duration::from_secs_f64(1.0 / fps),
      frame_index: 0,
      start_time: now,
      next_due: now,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn read_frame(&mut self) -> Result<Frame, InputError> {
    let now = Instant::now();
    if self.next_due > now {
      std::thread::sleep(self.next_due - now);
    }
    self.next_due = Instant::now() + self.interval;

    let frame = Frame::new(
      self.image.clone(),
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }
}
