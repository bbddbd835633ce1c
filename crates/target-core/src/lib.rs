//! Detection types, the detector seam and target selection.

pub mod detector;
pub mod selection;

pub use detector::{BoundingBox, Detection, Detector, DetectorError, IdleDetector, ReplayDetector};
pub use selection::{
    AimMode, PERSON_LABEL, TargetClass, TargetClassParseError, TargetObservation, TargetSelector,
    default_target_classes, nearest_person,
};
