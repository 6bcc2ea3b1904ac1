// 该文件是 Shulin （树林） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::task::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 200, 0]); // 绿色

/// 在图像上绘制检测框（2 像素宽），超出图像的部分被裁剪
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
  let (w, h) = (image.width() as i32, image.height() as i32);

  for detection in detections {
    let x_min = detection.x.max(0);
    let y_min = detection.y.max(0);
    let x_max = (detection.x + detection.width).min(w);
    let y_max = (detection.y + detection.height).min(h);
    if x_max <= x_min || y_max <= y_min {
      continue;
    }

    let (width, height) = ((x_max - x_min) as u32, (y_max - y_min) as u32);
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), BOX_COLOR);

    // 第二个边框以增加可见度
    if width > 2 && height > 2 {
      let inner = Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, BOX_COLOR);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(x: i32, y: i32, width: i32, height: i32) -> Detection {
    Detection {
      id: "tree_1".to_string(),
      x,
      y,
      width,
      height,
      confidence: 0.9,
    }
  }

  #[test]
  fn draws_box_outline_only() {
    let mut image = RgbImage::new(20, 20);
    draw_detections(&mut image, &[detection(2, 2, 10, 10)]);
    assert_eq!(image.get_pixel(2, 2), &BOX_COLOR);
    assert_eq!(image.get_pixel(3, 3), &BOX_COLOR);
    assert_eq!(image.get_pixel(7, 7), &Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_frame_boxes_are_ignored() {
    let mut image = RgbImage::new(10, 10);
    draw_detections(&mut image, &[detection(50, 50, 5, 5), detection(-20, -20, 5, 5)]);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
