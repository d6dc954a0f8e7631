// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统数据结构定义
/// Data structures for the detection pipeline
use serde::Serialize;

use crate::Bbox;

// ========== 公共常量 ==========

/// YOLOv8推理输入尺寸
pub const INPUT_SIZE: u32 = 640;

/// 每个候选的框参数个数 (cx, cy, w, h)
pub const CXCYWH_OFFSET: usize = 4;

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// 默认NMS IoU阈值
pub const DEFAULT_IOU: f32 = 0.45;

/// COCO 80类 (索引即类别ID)
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

// ========== 结构体类型 ==========

/// 单个检测结果 (原图像素坐标)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub class_id: usize,
    pub score: f32,
    pub bbox: Bbox,
}

/// 预处理后的输入张量 (CHW, 已归一化到 [0,1])
#[derive(Debug, Clone)]
pub struct InputTensor {
    pub data: Vec<f32>,
    pub side: u32,
    pub original_width: u32,
    pub original_height: u32,
}

/// 类别ID → 名称, 超出范围时回退为数字
pub fn class_name(names: &[String], class_id: usize) -> String {
    names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| class_id.to_string())
}

pub fn coco_names() -> Vec<String> {
    COCO_CLASSES.iter().map(|s| s.to_string()).collect()
}
