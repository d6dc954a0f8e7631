// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! YOLOv8 后处理: 候选解码 + 逐类别NMS
//!
//! 输出布局为通道优先 [C, D]: 通道 0..4 是 cx,cy,w,h (N×N 输入坐标),
//! 通道 4.. 是各类别得分.

use ndarray::{ArrayView2, Axis};

use super::types::{
    class_name, coco_names, Detection, CXCYWH_OFFSET, DEFAULT_CONFIDENCE, DEFAULT_IOU, INPUT_SIZE,
};
use crate::{non_max_suppression, Bbox};

#[derive(Debug, Clone)]
pub struct YoloV8Postprocessor {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub class_names: Vec<String>,
}

impl Default for YoloV8Postprocessor {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            input_size: INPUT_SIZE,
            class_names: coco_names(),
        }
    }
}

impl YoloV8Postprocessor {
    pub fn new(conf_threshold: f32, iou_threshold: f32, input_size: u32) -> Self {
        Self {
            conf_threshold,
            iou_threshold,
            input_size,
            ..Default::default()
        }
    }

    /// 逐候选解码, 得分 ≥ 阈值的保留, 坐标换算到原图并裁剪
    pub fn decode(&self, output: ArrayView2<f32>, width: u32, height: u32) -> Vec<Detection> {
        let channels = output.len_of(Axis(0));
        if channels <= CXCYWH_OFFSET {
            return Vec::new();
        }

        let (w0, h0) = (width as f32, height as f32);
        let n = self.input_size as f32;
        let (sx, sy) = (w0 / n, h0 / n);

        let mut ys = Vec::new();
        for pred in output.axis_iter(Axis(1)) {
            // 同分取最低类别ID
            let mut class_id = 0;
            let mut confidence = pred[CXCYWH_OFFSET];
            for c in 1..channels - CXCYWH_OFFSET {
                let score = pred[CXCYWH_OFFSET + c];
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence < self.conf_threshold {
                continue;
            }

            let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
            let bbox = Bbox::new(
                ((cx - w / 2.) * sx).clamp(0., w0),
                ((cy - h / 2.) * sy).clamp(0., h0),
                ((cx + w / 2.) * sx).clamp(0., w0),
                ((cy + h / 2.) * sy).clamp(0., h0),
            );

            ys.push(Detection {
                label: class_name(&self.class_names, class_id),
                class_id,
                score: confidence,
                bbox,
            });
        }
        ys
    }

    /// 解码 + NMS
    pub fn postprocess(&self, output: ArrayView2<f32>, width: u32, height: u32) -> Vec<Detection> {
        let mut ys = self.decode(output, width, height);
        non_max_suppression(&mut ys, self.iou_threshold);
        ys
    }
}

/// 只保留指定类别; 列表为空时不过滤
pub fn filter_labels(detections: Vec<Detection>, labels: &[String]) -> Vec<Detection> {
    if labels.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| labels.iter().any(|l| *l == d.label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// 由 (cx,cy,w,h,[scores]) 列表构造 [4+K, D] 输出
    fn raw(cands: &[(f32, f32, f32, f32, Vec<f32>)]) -> Array2<f32> {
        let k = cands[0].4.len();
        let mut out = Array2::<f32>::zeros((CXCYWH_OFFSET + k, cands.len()));
        for (i, (cx, cy, w, h, scores)) in cands.iter().enumerate() {
            out[[0, i]] = *cx;
            out[[1, i]] = *cy;
            out[[2, i]] = *w;
            out[[3, i]] = *h;
            for (c, s) in scores.iter().enumerate() {
                out[[CXCYWH_OFFSET + c, i]] = *s;
            }
        }
        out
    }

    fn post() -> YoloV8Postprocessor {
        YoloV8Postprocessor::default()
    }

    #[test]
    fn test_decode_same_size_is_plain_conversion() {
        let out = raw(&[(320., 240., 100., 50., vec![0.9, 0.1])]);
        let ys = post().decode(out.view(), 640, 640);
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].bbox, Bbox::new(270., 215., 370., 265.));
        assert_eq!(ys[0].label, "person");
        assert_eq!(ys[0].class_id, 0);
    }

    #[test]
    fn test_decode_rescales_to_original() {
        let out = raw(&[(320., 320., 64., 64., vec![0.9])]);
        let ys = post().decode(out.view(), 1280, 320);
        let b = ys[0].bbox;
        assert!((b.xmin - 576.).abs() < 1e-3);
        assert!((b.xmax - 704.).abs() < 1e-3);
        assert!((b.ymin - 144.).abs() < 1e-3);
        assert!((b.ymax - 176.).abs() < 1e-3);
    }

    #[test]
    fn test_confidence_threshold_inclusive() {
        let out = raw(&[
            (100., 100., 10., 10., vec![0.5]),
            (300., 300., 10., 10., vec![0.4999]),
        ]);
        let ys = post().decode(out.view(), 640, 640);
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].score, 0.5);
    }

    #[test]
    fn test_class_tie_takes_lowest_index() {
        let out = raw(&[(100., 100., 10., 10., vec![0.2, 0.7, 0.7])]);
        let ys = post().decode(out.view(), 640, 640);
        assert_eq!(ys[0].class_id, 1);
        assert_eq!(ys[0].label, "bicycle");
    }

    #[test]
    fn test_boxes_clamped_to_image() {
        let out = raw(&[(5., 635., 40., 40., vec![0.9])]);
        let ys = post().decode(out.view(), 640, 640);
        let b = ys[0].bbox;
        assert_eq!(b.xmin, 0.);
        assert_eq!(b.ymax, 640.);
        assert_eq!(b.xmax, 25.);
        assert_eq!(b.ymin, 615.);
    }

    #[test]
    fn test_same_label_duplicates_suppressed() {
        let out = raw(&[
            (100., 100., 50., 50., vec![0.6, 0.0]),
            (100., 100., 50., 50., vec![0.9, 0.0]),
        ]);
        let ys = post().postprocess(out.view(), 640, 640);
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].score, 0.9);
    }

    #[test]
    fn test_different_labels_never_suppress() {
        let out = raw(&[
            (100., 100., 50., 50., vec![0.9, 0.0]),
            (100., 100., 50., 50., vec![0.0, 0.8]),
        ]);
        let ys = post().postprocess(out.view(), 640, 640);
        assert_eq!(ys.len(), 2);
        assert_eq!(ys[0].label, "person");
        assert_eq!(ys[1].label, "bicycle");
    }

    #[test]
    fn test_filter_labels() {
        let out = raw(&[
            (100., 100., 50., 50., vec![0.9, 0.0]),
            (400., 400., 50., 50., vec![0.0, 0.8]),
        ]);
        let ys = post().postprocess(out.view(), 640, 640);
        let people = filter_labels(ys.clone(), &["person".to_string()]);
        assert_eq!(people.len(), 1);
        assert_eq!(filter_labels(ys, &[]).len(), 2);
    }

    #[test]
    fn test_degenerate_output_is_empty() {
        let out = Array2::<f32>::zeros((4, 10));
        assert!(post().decode(out.view(), 640, 640).is_empty());
    }
}
