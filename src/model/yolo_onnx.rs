// 该文件是 Shulin （树林） 项目的一部分。
// src/model/yolo_onnx.rs - YOLO ONNX 检测模型
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

use image::imageops::{self, FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, Detector, Labels, ModelError, non_max_suppression},
  query_param,
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const YOLO_BOX_CHANNELS: usize = 4;

type YoloPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum YoloOnnxError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("标签文件读取错误: {0}")]
  LabelsError(#[from] std::io::Error),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("不支持的输出形状: {0:?}")]
  UnexpectedOutputShape(Vec<usize>),
}

/// YOLOv8 风格的 ONNX 检测模型
///
/// 输出张量为 `[1, 4 + 类别数, 锚点数]`（也接受转置的 `[1, 锚点数, 4 + 类别数]`），
/// 前四个通道为输入尺度下的 `cx, cy, w, h`。
pub struct YoloOnnx {
  plan: YoloPlan,
  input_size: u32,
  iou_threshold: f32,
  labels: Labels,
}

pub struct YoloOnnxBuilder {
  model_path: String,
  input_size: u32,
  iou_threshold: f32,
  labels_path: Option<String>,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloOnnxError;

  /// `yolo:///path/model.onnx?size=640&iou=0.45&labels=/path/labels.txt`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloOnnxError::SchemeMismatch(Self::SCHEME));
    }

    Ok(YoloOnnxBuilder {
      model_path: url.path().to_string(),
      input_size: query_param(url, "size").unwrap_or(YOLO_DEFAULT_INPUT_SIZE),
      iou_threshold: query_param(url, "iou").unwrap_or(YOLO_DEFAULT_IOU_THRESHOLD),
      labels_path: query_param(url, "labels"),
    })
  }
}

impl YoloOnnxBuilder {
  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, YoloOnnxError> {
    info!("加载模型文件: {}", self.model_path);
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| model.with_input_fact(0, f32::fact([1, 3, size, size]).into()))
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| YoloOnnxError::ModelLoadError(e.to_string()))?;

    let labels = match &self.labels_path {
      Some(path) => Labels::from_file(path)?,
      None => Labels::coco(),
    };
    debug!("模型输入尺寸: {}x{}", size, size);
    debug!("类别数量: {}", labels.len());
    info!("模型加载完成");

    Ok(YoloOnnx {
      plan,
      input_size: self.input_size,
      iou_threshold: self.iou_threshold,
      labels,
    })
  }
}

impl YoloOnnx {
  fn preprocess(&self, frame: &Frame) -> Tensor {
    let size = self.input_size;
    let resized = imageops::resize(&frame.image, size, size, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn(
      (1, 3, size as usize, size as usize),
      |(_, c, y, x)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
    .into_tensor()
  }
}

impl Detector for YoloOnnx {
  fn detect(&self, frame: &Frame, confidence: f32) -> Result<Vec<DetectItem>, ModelError> {
    let now = Instant::now();
    let input = self.preprocess(frame);
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(|e| YoloOnnxError::InferenceError(e.to_string()))?;
    let output = outputs[0]
      .to_array_view::<f32>()
      .map_err(|e| YoloOnnxError::InferenceError(e.to_string()))?;

    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(YoloOnnxError::UnexpectedOutputShape(shape).into());
    }
    let predictions = output
      .index_axis(tract_ndarray::Axis(0), 0)
      .into_dimensionality::<tract_ndarray::Ix2>()
      .map_err(|_| YoloOnnxError::UnexpectedOutputShape(shape.clone()))?;
    // 锚点数总是多于通道数
    let predictions = if shape[1] > shape[2] {
      predictions.reversed_axes()
    } else {
      predictions
    };
    if predictions.nrows() <= YOLO_BOX_CHANNELS {
      return Err(YoloOnnxError::UnexpectedOutputShape(shape).into());
    }

    let scale = (
      frame.width() as f32 / self.input_size as f32,
      frame.height() as f32 / self.input_size as f32,
    );
    let bounds = (frame.width() as f32, frame.height() as f32);
    let items = decode_predictions(predictions, confidence, scale, bounds, &self.labels);
    let items = non_max_suppression(items, self.iou_threshold);
    debug!("推理完成，耗时: {:.2?}, 检测到 {} 个对象", now.elapsed(), items.len());

    Ok(items)
  }

  fn labels(&self) -> Option<&Labels> {
    Some(&self.labels)
  }
}

/// 解码 `[4 + 类别数, 锚点数]` 的预测矩阵
///
/// `scale` 把输入尺度映射回帧尺度，`bounds` 为帧的宽高。
fn decode_predictions(
  predictions: tract_ndarray::ArrayView2<f32>,
  confidence: f32,
  scale: (f32, f32),
  bounds: (f32, f32),
  labels: &Labels,
) -> Vec<DetectItem> {
  let (channels, anchors) = predictions.dim();
  let mut items = Vec::new();

  for i in 0..anchors {
    let Some((class_id, score)) = (YOLO_BOX_CHANNELS..channels)
      .map(|c| (c - YOLO_BOX_CHANNELS, predictions[[c, i]]))
      .max_by(|a, b| a.1.total_cmp(&b.1))
    else {
      continue;
    };
    if score < confidence {
      continue;
    }

    let (cx, cy) = (predictions[[0, i]], predictions[[1, i]]);
    let (w, h) = (predictions[[2, i]], predictions[[3, i]]);
    let bbox = [
      ((cx - w / 2.0) * scale.0).clamp(0.0, bounds.0),
      ((cy - h / 2.0) * scale.1).clamp(0.0, bounds.1),
      ((cx + w / 2.0) * scale.0).clamp(0.0, bounds.0),
      ((cy + h / 2.0) * scale.1).clamp(0.0, bounds.1),
    ];
    items.push(DetectItem::new(labels.name(class_id), score, bbox));
  }

  items
}
