// 该文件是 Shulin （树林） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::time::Instant;

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, yuyv_to_rgb},
  input::{FrameSource, InputError},
  query_param,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("MJPG decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Captured buffer size mismatch")]
  BufferSizeMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
}

/// V4L2 摄像头输入源
///
/// `stream` 声明在 `device` 之前，保证先于设备被释放。
pub struct V4lInput {
  stream: Stream<'static>,
  _device: Device,
  pixel_format: PixelFormat,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=640&height=480
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };
    let width = query_param(url, "width").unwrap_or(DEFAULT_WIDTH);
    let height = query_param(url, "height").unwrap_or(DEFAULT_HEIGHT);

    Self::open(&device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    let device = Device::with_path(device_path)?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    let pixel_format = if format.fourcc == FourCC::new(b"YUYV") {
      PixelFormat::Yuyv
    } else if format.fourcc == FourCC::new(b"MJPG") {
      PixelFormat::Mjpg
    } else {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    };

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;

    info!(
      "摄像头已打开: {} {}x{} {:?}",
      device_path, format.width, format.height, pixel_format
    );

    Ok(Self {
      stream,
      _device: device,
      pixel_format,
      width: format.width,
      height: format.height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }

  fn capture_image(&mut self) -> Result<RgbImage, V4lInputError> {
    let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
    let (buf, _meta) = self.stream.next()?;

    match pixel_format {
      PixelFormat::Yuyv => RgbImage::from_raw(width, height, yuyv_to_rgb(buf, width, height))
        .ok_or(V4lInputError::BufferSizeMismatch),
      PixelFormat::Mjpg => {
        Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
      }
    }
  }
}

impl FrameSource for V4lInput {
  fn read_frame(&mut self) -> Result<Frame, InputError> {
    let image = self.capture_image()?;
    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }
}
