// 该文件是 Xunying （寻影） 项目的一部分。
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

use clap::Parser;
use url::Url;
use xunying::{distance::Metric, reference::ReferenceSpec};

/// Xunying 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 重识别模型，例如 onnx:///models/reid.onnx?width=112&height=224
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 图片/目录: image:///path/to/frames
  /// - GStreamer: gst://camera/dev/video0 或 gst://file/path/to/video.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 观测输出
  /// 支持格式:
  /// - 日志: log:
  /// - JSON Lines: jsonl:///path/to/out.jsonl 或 jsonl:-
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,

  /// 参考图像 LABEL=URL，可重复；目录中的每张图像命名为 LABEL/文件名
  #[arg(long = "reference", value_name = "LABEL=URL", required = true)]
  pub references: Vec<ReferenceSpec>,

  /// 距离度量
  #[arg(long, value_enum, default_value_t = Metric::Cosine)]
  pub metric: Metric,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,

  /// 连续推理失败的上限
  #[arg(long, value_name = "COUNT", default_value_t = 5)]
  pub max_failures: u32,

  /// 无可用帧时的等待间隔（毫秒）
  #[arg(long, value_name = "MILLIS", default_value_t = 10)]
  pub idle_backoff_ms: u64,
}
