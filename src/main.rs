// 该文件是 Shulin （树林） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{sync::Arc, time::Duration};

use actix_web::{App, HttpServer, web};
use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shulin::{
  FromUrl,
  input::opener_from_url,
  lifecycle::LifecycleController,
  model::{DetectorWrapper, check_target_label},
  output::StreamOptions,
  server::{self, AppContext, auth::UserDirectory},
  slot::FrameSlot,
  task::{CaptureConfig, DetectionConfig},
};

#[actix_web::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("监听地址: {}", args.bind);

  info!("正在加载模型...");
  let detector = DetectorWrapper::from_url(&args.model)?;
  check_target_label(&detector, &args.target_label)?;
  info!("模型加载完成，目标类别: {}", args.target_label);

  let users = match &args.users {
    Some(path) => UserDirectory::from_json_file(path)?,
    None => {
      warn!("未提供用户文件，所有需要登录的页面都将拒绝访问");
      UserDirectory::default()
    }
  };

  let detection_config = DetectionConfig {
    target_label: args.target_label.clone(),
    confidence: args.confidence,
    interval: Duration::from_millis(args.detect_interval_ms),
    ..DetectionConfig::default()
  };
  let stream = StreamOptions {
    interval: Duration::from_millis(args.stream_interval_ms),
    jpeg_quality: args.jpeg_quality,
    overlay: args.overlay,
  };

  let lifecycle = LifecycleController::new(
    Arc::new(FrameSlot::new()),
    opener_from_url(args.input.clone()),
    Arc::new(detector),
    CaptureConfig::default(),
    detection_config,
  );
  let context = web::Data::new(AppContext::new(lifecycle, users, stream));

  info!("开始服务 http://{}", args.bind);
  let app_context = context.clone();
  HttpServer::new(move || {
    App::new()
      .app_data(app_context.clone())
      .configure(server::configure)
  })
  .bind(args.bind)?
  .run()
  .await?;

  info!("服务已退出，正在停止后台任务...");
  context.lifecycle.stop();
  Ok(())
}
