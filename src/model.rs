// 该文件是 Shulin （树林） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame};

mod labels;
pub use self::labels::{COCO_CLASSES, Labels};

#[cfg(feature = "model_yolo_onnx")]
mod yolo_onnx;
#[cfg(feature = "model_yolo_onnx")]
pub use self::yolo_onnx::{YoloOnnx, YoloOnnxBuilder, YoloOnnxError};

/// 单个原始检测结果：(类别, 置信度, 边框)
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // 像素坐标 [x_min, y_min, x_max, y_max]
}

impl DetectItem {
  pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }
}

/// 目标检测器
///
/// 返回置信度不低于 `confidence` 的检测结果，顺序即模型输出顺序。
pub trait Detector: Send + Sync {
  fn detect(&self, frame: &Frame, confidence: f32) -> Result<Vec<DetectItem>, ModelError>;

  /// 模型能输出的类别，未知时为 `None`
  fn labels(&self) -> Option<&Labels> {
    None
  }
}

/// 确认检测器能输出目标类别，否则检测结果永远为空
pub fn check_target_label(detector: &dyn Detector, target_label: &str) -> Result<(), ModelError> {
  match detector.labels() {
    Some(labels) if !labels.contains(target_label) => {
      Err(ModelError::UnknownTargetLabel(target_label.to_string()))
    }
    _ => Ok(()),
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_yolo_onnx")]
  #[error("YOLO ONNX 模型错误: {0}")]
  YoloOnnxError(#[from] YoloOnnxError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型类别中没有 '{0}'，需要使用识别该类别的模型或通过 labels= 指定标签文件")]
  UnknownTargetLabel(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum DetectorWrapper {
  #[cfg(feature = "model_yolo_onnx")]
  YoloOnnx(Box<YoloOnnx>),
  /// 未启用任何模型特性时无法构造
  #[cfg(not(feature = "model_yolo_onnx"))]
  Unavailable(std::convert::Infallible),
}

impl FromUrl for DetectorWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_yolo_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == YoloOnnxBuilder::SCHEME {
        let model = YoloOnnxBuilder::from_url(url)?.build()?;
        return Ok(DetectorWrapper::YoloOnnx(Box::new(model)));
      }
    }
    Err(ModelError::SchemeMismatch)
  }
}

impl Detector for DetectorWrapper {
  fn detect(&self, frame: &Frame, confidence: f32) -> Result<Vec<DetectItem>, ModelError> {
    match self {
      #[cfg(feature = "model_yolo_onnx")]
      DetectorWrapper::YoloOnnx(model) => model.detect(frame, confidence),
      #[cfg(not(feature = "model_yolo_onnx"))]
      DetectorWrapper::Unavailable(never) => match *never {},
    }
  }

  fn labels(&self) -> Option<&Labels> {
    match self {
      #[cfg(feature = "model_yolo_onnx")]
      DetectorWrapper::YoloOnnx(model) => model.labels(),
      #[cfg(not(feature = "model_yolo_onnx"))]
      DetectorWrapper::Unavailable(never) => match *never {},
    }
  }
}

/// 两个边框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x_min = a[0].max(b[0]);
  let y_min = a[1].max(b[1]);
  let x_max = a[2].min(b[2]);
  let y_max = a[3].min(b[3]);

  let inter = (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;

  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别的非极大值抑制，结果按置信度降序排列
pub fn non_max_suppression(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept
      .iter()
      .any(|k| k.label == item.label && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}
