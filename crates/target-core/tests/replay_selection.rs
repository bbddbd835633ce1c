use std::{fs, process};

use frame_link::{Frame, FrameFormat};
use target_core::{
    AimMode, BoundingBox, Detector, ReplayDetector, TargetSelector, default_target_classes,
};

fn frame(sequence: u64) -> Frame {
    Frame {
        data: vec![0; 640 * 480 * 3],
        width: 640,
        height: 480,
        timestamp_ms: 0,
        sequence,
        format: FrameFormat::Rgb8,
    }
}

#[test]
fn replayed_detections_drive_selection() {
    let path = std::env::temp_dir().join(format!("replay-selection-{}.jsonl", process::id()));
    fs::write(
        &path,
        concat!(
            r#"[{"label":"person","confidence":0.9,"bbox":{"x1":0,"y1":0,"x2":100,"y2":300}},"#,
            r#"{"label":"Machine Gun","confidence":0.7,"bbox":{"x1":300,"y1":200,"x2":500,"y2":400}}]"#,
            "\n",
            r#"[{"label":"cup","confidence":0.99,"bbox":{"x1":0,"y1":0,"x2":10,"y2":10}}]"#,
            "\n",
        ),
    )
    .unwrap();

    let mut detector = ReplayDetector::from_path(&path).unwrap();
    fs::remove_file(&path).unwrap();
    let selector = TargetSelector::new(default_target_classes(), 0.5, AimMode::Target);

    let first = detector.detect(&frame(1)).unwrap();
    let target = selector.select(&first, 640, 480).unwrap();
    assert_eq!(target.class, "rifle");
    assert_eq!(target.bbox, BoundingBox::new(300.0, 200.0, 500.0, 400.0));
    assert_eq!(target.person, Some(BoundingBox::new(0.0, 0.0, 100.0, 300.0)));

    let second = detector.detect(&frame(2)).unwrap();
    assert!(selector.select(&second, 640, 480).is_none());

    let third = detector.detect(&frame(3)).unwrap();
    assert_eq!(third, first);
}
