use tracing::warn;
use ztopo_config::WorkflowChoice;
use ztopo_core::document::{Document, EntityTag};
use ztopo_core::geometry::Point2;

fn p(x: f64, y: f64) -> Point2 {
    Point2::new(x, y)
}

/// 与工作流对应的内置示例图。每张图都带有若干该工作流能发现的缺陷。
pub fn sample_document(choice: WorkflowChoice) -> Document {
    match choice {
        WorkflowChoice::Line => line_sample(),
        WorkflowChoice::Polygon => polygon_sample(),
        WorkflowChoice::Annotation => annotation_sample(),
    }
}

fn line_sample() -> Document {
    let mut doc = Document::new();
    doc.add_polyline(
        [p(0.0, 0.0), p(0.0, 20.0), p(30.0, 20.0), p(30.0, 0.0)],
        true,
        "parcel",
    );
    // 穿出宗地两侧的道路中线，以及一条完全重合的复制。
    doc.add_line(p(-3.0, 10.0), p(33.0, 10.0), "road");
    doc.add_line(p(33.0, 10.0), p(-3.0, 10.0), "road");
    // 端点相差不足一毫米的两段分界线。
    doc.add_line(p(15.0, 20.0), p(15.0, 10.0), "boundary");
    doc.add_line(p(15.0, 0.0), p(15.0004, 10.0), "boundary");
    doc.add_line(p(40.0, 5.0), p(40.0, 5.0), "0");
    doc
}

fn polygon_sample() -> Document {
    let mut doc = Document::new();
    // 逆时针绘制的宗地。
    let ccw = doc.add_polyline(
        [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)],
        true,
        "parcel",
    );
    // 接缝未闭合的宗地，与左侧宗地之间留有 5 mm 缝隙。
    let open = doc.add_polyline(
        [
            p(10.005, 0.0),
            p(10.005, 10.0),
            p(20.0, 10.0),
            p(20.0, 0.0),
            p(10.006, 0.0),
        ],
        false,
        "parcel",
    );
    // 碎片面。
    doc.add_polyline(
        [p(30.0, 0.0), p(30.0, 0.5), p(30.5, 0.5), p(30.5, 0.0)],
        true,
        "parcel",
    );
    // 宗地内部未登记的孔洞。
    doc.add_polyline(
        [p(2.0, 2.0), p(2.0, 4.0), p(4.0, 4.0), p(4.0, 2.0)],
        true,
        "parcel",
    );
    for id in [ccw, open] {
        if let Err(err) = doc.tag_entity(id, EntityTag::Parcel) {
            warn!(error = %err, "示例宗地标记失败");
        }
    }
    doc
}

fn annotation_sample() -> Document {
    let mut doc = Document::new();
    doc.add_text(p(0.0, 0.0), "宗地 101", 2.5, 0.0, "label");
    doc.add_text(p(6.0, 1.0), "宗地 102", 2.5, 0.0, "label");
    doc.add_text(p(0.0, 10.0), "宗地 103", 2.5, 0.0, "label");
    doc
}
