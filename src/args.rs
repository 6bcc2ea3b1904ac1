// 该文件是 Shulin （树林） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use shulin::task::{DEFAULT_CONFIDENCE, DEFAULT_TARGET_LABEL};

/// Shulin 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - V4L2: v4l:///dev/video0?width=640&height=480
  /// - 图片: image:///path/to/tree.jpg?fps=10
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video1")]
  pub input: Url,

  /// 模型路径，例如 yolo:///path/to/trees.onnx?size=640&labels=/path/to/labels.txt
  ///
  /// 未指定 labels= 时使用 COCO 类别，其中没有 tree；
  /// 需要使用以树木训练的模型并提供其标签文件，否则启动失败。
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// HTTP 监听地址
  #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:5000")]
  pub bind: SocketAddr,

  /// 用户列表 JSON 文件，不提供时所有需要登录的页面都返回 401
  #[arg(long, value_name = "FILE")]
  pub users: Option<PathBuf>,

  /// 需要上报的目标类别，必须出现在模型的标签中
  #[arg(long, value_name = "LABEL", default_value = DEFAULT_TARGET_LABEL)]
  pub target_label: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_CONFIDENCE)]
  pub confidence: f32,

  /// 两次推理之间的间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 100)]
  pub detect_interval_ms: u64,

  /// 推流轮询间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 33)]
  pub stream_interval_ms: u64,

  /// JPEG 编码质量 (1 - 100)
  #[arg(long, value_name = "QUALITY", default_value_t = 80)]
  pub jpeg_quality: u8,

  /// 在推流画面上叠加检测框
  #[arg(long)]
  pub overlay: bool,
}
