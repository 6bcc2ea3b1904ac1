// 该文件是 Shulin （树林） 项目的一部分。
// src/server.rs - HTTP 服务
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

//! 仪表盘、MJPEG 推流与检测接口
//!
//! 所有处理函数共享一个 [`AppContext`]，它在进程启动时创建一次，
//! 通过 `web::Data` 传入，不使用任何全局状态。

use std::sync::Arc;

use actix_web::{
  HttpResponse, ResponseError,
  http::{StatusCode, header},
  web,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  decision::DecisionStore,
  lifecycle::{LifecycleController, LifecycleError},
  output::{MJPEG_CONTENT_TYPE, StreamOptions, mjpeg_stream},
  slot::FrameSlot,
};

pub mod auth;
pub mod pages;

use self::auth::{CurrentUser, Role, UserDirectory};

/// 请求处理共享的应用上下文
pub struct AppContext {
  pub lifecycle: LifecycleController,
  pub decisions: DecisionStore,
  pub users: UserDirectory,
  pub stream: StreamOptions,
}

impl AppContext {
  pub fn new(lifecycle: LifecycleController, users: UserDirectory, stream: StreamOptions) -> Self {
    Self {
      lifecycle,
      decisions: DecisionStore::new(),
      users,
      stream,
    }
  }

  pub fn slot(&self) -> &Arc<FrameSlot> {
    self.lifecycle.slot()
  }
}

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("login required")]
  Unauthorized,
  #[error("Invalid data")]
  InvalidData,
  #[error("no decision recorded for {0}")]
  DecisionNotFound(String),
  #[error("lifecycle error: {0}")]
  LifecycleError(#[from] LifecycleError),
  #[error("blocking task failed: {0}")]
  BlockingError(#[from] actix_web::error::BlockingError),
}

impl ResponseError for ServerError {
  fn status_code(&self) -> StatusCode {
    match self {
      ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
      ServerError::InvalidData => StatusCode::BAD_REQUEST,
      ServerError::DecisionNotFound(_) => StatusCode::NOT_FOUND,
      ServerError::LifecycleError(_) | ServerError::BlockingError(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    match self {
      ServerError::Unauthorized => HttpResponse::Unauthorized()
        .content_type("text/plain; charset=utf-8")
        .body(self.to_string()),
      _ => HttpResponse::build(self.status_code()).json(json!({
        "status": "error",
        "message": self.to_string(),
      })),
    }
  }
}

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig) {
  cfg
    .app_data(
      web::JsonConfig::default().error_handler(|err, _req| {
        warn!("无法解析 JSON 请求: {}", err);
        ServerError::InvalidData.into()
      }),
    )
    .route("/", web::get().to(home))
    .route("/customer", web::get().to(customer_dashboard))
    .route("/developer", web::get().to(developer_dashboard))
    .route("/webcam", web::get().to(webcam_page))
    .route("/video_feed", web::get().to(video_feed))
    .route("/detections", web::get().to(detections))
    .route("/decision", web::post().to(record_decision))
    .route("/decisions", web::get().to(list_decisions))
    .route("/decisions/{tree_id}", web::get().to(get_decision))
    .route("/stop", web::get().to(stop))
    .route("/stop", web::post().to(stop))
    .route("/status", web::get().to(status));
}

fn redirect(location: &str) -> HttpResponse {
  HttpResponse::SeeOther()
    .insert_header((header::LOCATION, location))
    .finish()
}

fn html(body: String) -> HttpResponse {
  HttpResponse::Ok()
    .content_type("text/html; charset=utf-8")
    .body(body)
}

/// 按角色跳转到对应仪表盘
async fn home(user: CurrentUser) -> HttpResponse {
  redirect(user.0.role.dashboard())
}

async fn customer_dashboard(user: CurrentUser) -> HttpResponse {
  html(pages::customer_dashboard(&user.0))
}

/// 非开发者被送回自己的仪表盘
async fn developer_dashboard(user: CurrentUser) -> HttpResponse {
  if user.0.role != Role::Developer {
    return redirect(user.0.role.dashboard());
  }
  html(pages::developer_dashboard(&user.0))
}

/// 首次访问时启动采集与检测任务，遇到进行中的停止会等待其完成
async fn webcam_page(
  context: web::Data<AppContext>,
  user: CurrentUser,
) -> Result<HttpResponse, ServerError> {
  let lifecycle_context = context.clone();
  web::block(move || lifecycle_context.lifecycle.start()).await??;
  Ok(html(pages::webcam(&user.0)))
}

async fn video_feed(context: web::Data<AppContext>, _user: CurrentUser) -> HttpResponse {
  let stream = mjpeg_stream(context.slot().clone(), context.stream.clone());
  HttpResponse::Ok()
    .insert_header((header::CACHE_CONTROL, "no-cache"))
    .insert_header((header::CONTENT_TYPE, MJPEG_CONTENT_TYPE))
    .streaming(stream)
}

async fn detections(context: web::Data<AppContext>) -> HttpResponse {
  let trees = context.slot().read_detections();
  HttpResponse::Ok().json(json!({ "trees": &*trees }))
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
  tree_id: Option<String>,
  decision: Option<String>,
}

async fn record_decision(
  context: web::Data<AppContext>,
  request: web::Json<DecisionRequest>,
) -> Result<HttpResponse, ServerError> {
  let DecisionRequest { tree_id, decision } = request.into_inner();
  match (tree_id, decision) {
    (Some(tree_id), Some(decision)) if !tree_id.is_empty() && !decision.is_empty() => {
      context.decisions.record(tree_id, decision);
      Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
    }
    _ => Err(ServerError::InvalidData),
  }
}

async fn list_decisions(context: web::Data<AppContext>) -> HttpResponse {
  HttpResponse::Ok().json(context.decisions.all())
}

async fn get_decision(
  context: web::Data<AppContext>,
  tree_id: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
  let tree_id = tree_id.into_inner();
  match context.decisions.get(&tree_id) {
    Some(decision) => Ok(HttpResponse::Ok().json(json!({
      "tree_id": tree_id,
      "decision": decision,
    }))),
    None => Err(ServerError::DecisionNotFound(tree_id)),
  }
}

/// 停止任务并释放摄像头，下次访问页面时重新启动
async fn stop(context: web::Data<AppContext>, _user: CurrentUser) -> Result<HttpResponse, ServerError> {
  let lifecycle_context = context.clone();
  web::block(move || lifecycle_context.lifecycle.stop()).await?;
  info!("摄像头已停止");
  Ok(
    HttpResponse::Ok()
      .content_type("text/plain; charset=utf-8")
      .body("Camera stopped"),
  )
}

async fn status(context: web::Data<AppContext>) -> HttpResponse {
  HttpResponse::Ok().json(context.lifecycle.status())
}
