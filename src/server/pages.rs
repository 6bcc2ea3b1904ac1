// 该文件是 Shulin （树林） 项目的一部分。
// src/server/pages.rs - 页面模板
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

use crate::server::auth::{Role, User};

const WEBCAM_SCRIPT: &str = r#"
<script>
async function refreshTrees() {
  const res = await fetch('/detections');
  const body = await res.json();
  const list = document.getElementById('trees');
  list.innerHTML = '';
  document.getElementById('count').textContent = body.trees.length;
  for (const tree of body.trees) {
    const item = document.createElement('li');
    item.textContent = `${tree.id} (${(tree.conf * 100).toFixed(0)}%) `;
    for (const decision of ['keep', 'cut']) {
      const button = document.createElement('button');
      button.textContent = decision;
      button.onclick = () => fetch('/decision', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({tree_id: tree.id, decision}),
      });
      item.appendChild(button);
    }
    list.appendChild(item);
  }
}
setInterval(refreshTrees, 1000);
</script>
"#;

pub fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

fn layout(title: &str, user: &User, body: &str) -> String {
  let developer_link = if user.role == Role::Developer {
    r#" | <a href="/developer">Developer</a>"#
  } else {
    ""
  };
  format!(
    "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n\
     <nav><a href=\"/customer\">Dashboard</a>{developer_link} | <a href=\"/webcam\">Webcam</a></nav>\n\
     <h1>{title}</h1>\n<p>Hello, {name}</p>\n{body}\n</body>\n</html>\n",
    title = title,
    developer_link = developer_link,
    name = escape_html(&user.first_name),
    body = body,
  )
}

pub fn customer_dashboard(user: &User) -> String {
  layout(
    "Customer Dashboard",
    user,
    &format!(
      "<p>Member since {}</p>",
      user.created_at.format("%Y-%m-%d")
    ),
  )
}

pub fn developer_dashboard(user: &User) -> String {
  layout(
    "Developer Dashboard",
    user,
    r#"<ul>
<li><a href="/status">Pipeline status</a></li>
<li><a href="/detections">Latest detections</a></li>
<li><a href="/decisions">Recorded decisions</a></li>
<li><a href="/stop">Stop camera</a></li>
</ul>"#,
  )
}

pub fn webcam(user: &User) -> String {
  let body = format!(
    "<img src=\"/video_feed\" alt=\"webcam\">\n<p>Trees in view: <span id=\"count\">0</span></p>\n\
     <ul id=\"trees\"></ul>\n{}",
    WEBCAM_SCRIPT
  );
  layout("Webcam", user, &body)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  fn user(name: &str, role: Role) -> User {
    User {
      id: 1,
      email: "a@example.com".to_string(),
      password_hash: String::new(),
      first_name: name.to_string(),
      role,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn names_are_escaped() {
    let page = customer_dashboard(&user("<b>Eve</b>", Role::Customer));
    assert!(page.contains("&lt;b&gt;Eve&lt;/b&gt;"));
    assert!(!page.contains("<b>Eve"));
  }

  #[test]
  fn developer_link_only_for_developers() {
    assert!(!customer_dashboard(&user("Ann", Role::Customer)).contains("/developer"));
    assert!(customer_dashboard(&user("Dev", Role::Developer)).contains("/developer"));
  }

  #[test]
  fn webcam_page_embeds_the_stream() {
    assert!(webcam(&user("Ann", Role::Customer)).contains("src=\"/video_feed\""));
  }
}
