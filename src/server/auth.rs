// 该文件是 Shulin （树林） 项目的一部分。
// src/server/auth.rs - 用户与角色
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

//! 身份由上游认证代理提供：代理校验登录后把用户邮箱写入
//! `X-Forwarded-Email` 请求头，这里只负责按邮箱查找用户与角色。

use std::{
  collections::HashMap,
  future::{Ready, ready},
  path::Path,
};

use actix_web::{FromRequest, HttpRequest, dev::Payload, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::server::{AppContext, ServerError};

pub const IDENTITY_HEADER: &str = "X-Forwarded-Email";

#[derive(Error, Debug)]
pub enum AuthError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("用户文件格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("重复的用户邮箱: {0}")]
  DuplicateEmail(String),
}

/// 角色决定用户看到哪个仪表盘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[default]
  Customer,
  Developer,
}

impl Role {
  /// 该角色自己的仪表盘
  pub fn dashboard(&self) -> &'static str {
    match self {
      Role::Customer => "/customer",
      Role::Developer => "/developer",
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
  pub id: u64,
  pub email: String,
  /// 由身份提供方管理，这里只原样保存
  #[serde(default)]
  pub password_hash: String,
  pub first_name: String,
  #[serde(default)]
  pub role: Role,
  #[serde(default = "Utc::now")]
  pub created_at: DateTime<Utc>,
}

/// 按邮箱索引的用户表，邮箱不区分大小写且唯一
#[derive(Debug, Default)]
pub struct UserDirectory {
  by_email: HashMap<String, User>,
}

impl UserDirectory {
  pub fn new(users: impl IntoIterator<Item = User>) -> Result<Self, AuthError> {
    let mut by_email = HashMap::new();
    for user in users {
      let key = user.email.to_lowercase();
      if by_email.contains_key(&key) {
        return Err(AuthError::DuplicateEmail(user.email));
      }
      by_email.insert(key, user);
    }
    Ok(Self { by_email })
  }

  /// 从 JSON 数组文件加载用户
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let users: Vec<User> = serde_json::from_str(&content)?;
    let directory = Self::new(users)?;
    info!("已加载 {} 个用户: {}", directory.len(), path.as_ref().display());
    Ok(directory)
  }

  pub fn find(&self, email: &str) -> Option<&User> {
    self.by_email.get(&email.trim().to_lowercase())
  }

  pub fn len(&self) -> usize {
    self.by_email.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_email.is_empty()
  }
}

/// 当前登录用户；缺少身份或用户不存在时返回 401
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
  fn resolve(req: &HttpRequest) -> Result<Self, ServerError> {
    let email = req
      .headers()
      .get(IDENTITY_HEADER)
      .and_then(|value| value.to_str().ok())
      .ok_or(ServerError::Unauthorized)?;
    let context = req
      .app_data::<web::Data<AppContext>>()
      .ok_or(ServerError::Unauthorized)?;

    match context.users.find(email) {
      Some(user) => Ok(CurrentUser(user.clone())),
      None => {
        debug!("未知用户: {}", email);
        Err(ServerError::Unauthorized)
      }
    }
  }
}

impl FromRequest for CurrentUser {
  type Error = ServerError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(Self::resolve(req))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn user(id: u64, email: &str, role: Role) -> User {
    User {
      id,
      email: email.to_string(),
      password_hash: String::new(),
      first_name: "Ada".to_string(),
      role,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn lookup_ignores_case_and_whitespace() {
    let directory = UserDirectory::new([user(1, "Ada@Example.com", Role::Developer)]).unwrap();
    assert_eq!(directory.find(" ada@example.com ").map(|u| u.id), Some(1));
    assert!(directory.find("bob@example.com").is_none());
  }

  #[test]
  fn duplicate_emails_are_rejected() {
    let result = UserDirectory::new([
      user(1, "ada@example.com", Role::Customer),
      user(2, "ADA@example.com", Role::Developer),
    ]);
    assert!(matches!(result, Err(AuthError::DuplicateEmail(_))));
  }

  #[test]
  fn role_defaults_to_customer() {
    let users: Vec<User> =
      serde_json::from_str(r#"[{"id": 3, "email": "c@example.com", "first_name": "Cy"}]"#).unwrap();
    assert_eq!(users[0].role, Role::Customer);
    assert_eq!(users[0].role.dashboard(), "/customer");
  }
}
