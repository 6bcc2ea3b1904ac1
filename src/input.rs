// 该文件是 Shulin （树林） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

/// 帧输入源：读取下一帧或失败
pub trait FrameSource {
  fn read_frame(&mut self) -> Result<Frame, InputError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read_frame(&mut self) -> Result<Frame, InputError> {
    (**self).read_frame()
  }
}

/// 输入源工厂
///
/// 采集线程在自己的线程上调用它打开设备，每次重启都会重新打开。
pub type SourceOpener = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, InputError> + Send + Sync>;

/// 根据 URL 构造输入源工厂
pub fn opener_from_url(url: Url) -> SourceOpener {
  Arc::new(move || {
    let input = InputWrapper::from_url(&url)?;
    Ok(Box::new(input) as Box<dyn FrameSource>)
  })
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("Frame read failed: {0}")]
  ReadFailed(String),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  /// 未启用任何输入特性时无法构造
  #[cfg(not(any(feature = "v4l_input", feature = "read_image_file")))]
  Unavailable(std::convert::Infallible),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4l(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn read_frame(&mut self) -> Result<Frame, InputError> {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.read_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.read_frame(),
      #[cfg(not(any(feature = "v4l_input", feature = "read_image_file")))]
      InputWrapper::Unavailable(never) => match *never {},
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[cfg(not(any(feature = "v4l_input", feature = "read_image_file")))]
  #[test]
  fn without_input_features_every_scheme_is_rejected() {
    let url = Url::parse("v4l:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn opener_reports_open_failure_lazily() {
    let url = Url::parse("ftp://nowhere/video").unwrap();
    let opener = opener_from_url(url);
    // 构造工厂本身不会打开设备
    assert!(opener().is_err());
  }
}
