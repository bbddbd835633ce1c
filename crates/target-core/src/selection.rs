//! Picking the one detection worth aiming at.

use std::{fmt, str::FromStr, time::Instant};

use thiserror::Error;
use tracing::trace;

use crate::detector::{BoundingBox, Detection};

/// Label the detector uses for people.
pub const PERSON_LABEL: &str = "person";

/// A named group of detector labels treated as one kind of target.
///
/// A label matches when any alias occurs in it, ignoring case, so `gun` also
/// catches `machine gun` and `Gun`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetClass {
    pub name: String,
    pub aliases: Vec<String>,
}

impl TargetClass {
    pub fn new<I, S>(name: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            aliases: aliases
                .into_iter()
                .map(|alias| alias.into().to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        self.longest_match(&label.to_lowercase()).is_some()
    }

    /// Length of the longest alias contained in an already lowercased label.
    fn longest_match(&self, label: &str) -> Option<usize> {
        self.aliases
            .iter()
            .filter(|alias| label.contains(alias.as_str()))
            .map(String::len)
            .max()
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.aliases.join(","))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetClassParseError {
    #[error("expected NAME=ALIAS[,ALIAS...], got `{0}`")]
    Malformed(String),
    #[error("target class `{0}` has no aliases")]
    NoAliases(String),
}

impl FromStr for TargetClass {
    type Err = TargetClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, aliases) = s
            .split_once('=')
            .ok_or_else(|| TargetClassParseError::Malformed(s.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TargetClassParseError::Malformed(s.to_string()));
        }
        let aliases: Vec<&str> = aliases
            .split(',')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .collect();
        if aliases.is_empty() {
            return Err(TargetClassParseError::NoAliases(name.to_string()));
        }
        Ok(Self::new(name, aliases))
    }
}

pub fn default_target_classes() -> Vec<TargetClass> {
    vec![
        TargetClass::new("pistol", ["pistol", "gun"]),
        TargetClass::new("rifle", ["rifle", "assault rifle", "machine gun"]),
        TargetClass::new("knife", ["knife", "sword", "dagger"]),
    ]
}

/// What the turret should point at once a target object is found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AimMode {
    /// The target object itself.
    #[default]
    Target,
    /// The person closest to the target object, falling back to the object
    /// when nobody is in frame.
    NearestPerson,
}

impl FromStr for AimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "target" | "object" => Ok(Self::Target),
            "person" | "nearest-person" => Ok(Self::NearestPerson),
            other => Err(format!("unknown aim mode `{other}`")),
        }
    }
}

/// Best target found in one frame, ready to be turned into coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetObservation {
    /// Name of the matched target class group.
    pub class: String,
    /// Raw detector label.
    pub label: String,
    /// Box to aim at: the object, or the associated person in
    /// [`AimMode::NearestPerson`].
    pub bbox: BoundingBox,
    pub object: BoundingBox,
    pub person: Option<BoundingBox>,
    pub confidence: f32,
    pub frame_width: i32,
    pub frame_height: i32,
    pub observed_at: Instant,
}

#[derive(Clone, Debug)]
pub struct TargetSelector {
    classes: Vec<TargetClass>,
    min_confidence: f32,
    aim: AimMode,
}

impl TargetSelector {
    pub fn new(classes: Vec<TargetClass>, min_confidence: f32, aim: AimMode) -> Self {
        Self {
            classes,
            min_confidence,
            aim,
        }
    }

    pub fn select(
        &self,
        detections: &[Detection],
        frame_width: i32,
        frame_height: i32,
    ) -> Option<TargetObservation> {
        self.select_at(detections, frame_width, frame_height, Instant::now())
    }

    /// Highest-confidence detection belonging to a target class and meeting
    /// the confidence floor. Ties keep the earlier detection.
    pub fn select_at(
        &self,
        detections: &[Detection],
        frame_width: i32,
        frame_height: i32,
        now: Instant,
    ) -> Option<TargetObservation> {
        let mut best: Option<(&TargetClass, &Detection)> = None;
        for detection in detections {
            if detection.confidence < self.min_confidence {
                continue;
            }
            let Some(class) = self.classify(&detection.label) else {
                continue;
            };
            if best.is_none_or(|(_, current)| detection.confidence > current.confidence) {
                best = Some((class, detection));
            }
        }

        let (class, detection) = best?;
        let person = nearest_person(&detection.bbox, detections);
        let bbox = match (self.aim, person) {
            (AimMode::NearestPerson, Some(person)) => person,
            _ => detection.bbox,
        };
        trace!(
            class = %class.name,
            label = %detection.label,
            confidence = detection.confidence,
            has_person = person.is_some(),
            "target selected"
        );

        Some(TargetObservation {
            class: class.name.clone(),
            label: detection.label.clone(),
            bbox,
            object: detection.bbox,
            person,
            confidence: detection.confidence,
            frame_width,
            frame_height,
            observed_at: now,
        })
    }

    /// The group with the most specific (longest) matching alias; earlier groups win ties.
    fn classify(&self, label: &str) -> Option<&TargetClass> {
        let label = label.to_lowercase();
        let mut best: Option<(&TargetClass, usize)> = None;
        for class in &self.classes {
            if let Some(len) = class.longest_match(&label) {
                if best.is_none_or(|(_, best_len)| len > best_len) {
                    best = Some((class, len));
                }
            }
        }
        best.map(|(class, _)| class)
    }
}

/// Person box whose centre lies closest to the centre of `object`.
pub fn nearest_person(object: &BoundingBox, detections: &[Detection]) -> Option<BoundingBox> {
    let (ox, oy) = object.center();
    detections
        .iter()
        .filter(|d| d.label.to_lowercase().contains(PERSON_LABEL))
        .map(|d| {
            let (px, py) = d.bbox.center();
            (d.bbox, (px - ox).hypot(py - oy))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(bbox, _)| bbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
        }
    }

    fn selector(aim: AimMode) -> TargetSelector {
        TargetSelector::new(default_target_classes(), 0.5, aim)
    }

    #[test]
    fn class_matching_is_case_insensitive_substring() {
        let rifle = TargetClass::new("rifle", ["rifle", "machine gun"]);
        assert!(rifle.matches("Assault Rifle"));
        assert!(rifle.matches("machine gun"));
        assert!(!rifle.matches("gunner"));
    }

    #[test]
    fn longest_alias_decides_the_class() {
        let selector = TargetSelector::new(default_target_classes(), 0.5, AimMode::Target);
        let class = |label| selector.classify(label).map(|class| class.name.as_str());
        assert_eq!(class("Machine Gun"), Some("rifle"));
        assert_eq!(class("handgun"), Some("pistol"));
        assert_eq!(class("kitchen knife"), Some("knife"));
        assert_eq!(class("person"), None);
    }

    #[test]
    fn parses_class_groups() {
        let class: TargetClass = "blade = knife, Sword ,".parse().unwrap();
        assert_eq!(class.name, "blade");
        assert_eq!(class.aliases, vec!["knife", "sword"]);
        assert_eq!(class.to_string(), "blade=knife,sword");

        assert!(matches!(
            "knife".parse::<TargetClass>(),
            Err(TargetClassParseError::Malformed(_))
        ));
        assert_eq!(
            "knife=".parse::<TargetClass>(),
            Err(TargetClassParseError::NoAliases("knife".into()))
        );
    }

    #[test]
    fn highest_confidence_target_wins() {
        let detections = [
            det("knife", 0.6, (0.0, 0.0, 10.0, 10.0)),
            det("person", 0.99, (100.0, 100.0, 200.0, 300.0)),
            det("pistol", 0.8, (50.0, 50.0, 60.0, 60.0)),
            det("cup", 0.95, (0.0, 0.0, 5.0, 5.0)),
        ];
        let observation = selector(AimMode::Target)
            .select(&detections, 640, 480)
            .unwrap();
        assert_eq!(observation.class, "pistol");
        assert_eq!(observation.bbox, BoundingBox::new(50.0, 50.0, 60.0, 60.0));
        assert_eq!((observation.frame_width, observation.frame_height), (640, 480));
    }

    #[test]
    fn confidence_floor_filters_candidates() {
        let detections = [det("knife", 0.3, (0.0, 0.0, 10.0, 10.0))];
        assert!(selector(AimMode::Target).select(&detections, 640, 480).is_none());
        assert!(selector(AimMode::Target).select(&[], 640, 480).is_none());
    }

    #[test]
    fn nearest_person_is_associated() {
        let detections = [
            det("person", 0.9, (400.0, 0.0, 500.0, 200.0)),
            det("person", 0.9, (0.0, 0.0, 100.0, 200.0)),
            det("knife", 0.7, (90.0, 90.0, 110.0, 110.0)),
        ];
        let target = selector(AimMode::Target)
            .select(&detections, 640, 480)
            .unwrap();
        assert_eq!(target.person, Some(BoundingBox::new(0.0, 0.0, 100.0, 200.0)));
        assert_eq!(target.bbox, target.object);

        let aimed = selector(AimMode::NearestPerson)
            .select(&detections, 640, 480)
            .unwrap();
        assert_eq!(aimed.bbox, BoundingBox::new(0.0, 0.0, 100.0, 200.0));
        assert_eq!(aimed.object, BoundingBox::new(90.0, 90.0, 110.0, 110.0));
    }

    #[test]
    fn person_aim_falls_back_to_object() {
        let detections = [det("dagger", 0.7, (10.0, 10.0, 20.0, 20.0))];
        let aimed = selector(AimMode::NearestPerson)
            .select(&detections, 640, 480)
            .unwrap();
        assert_eq!(aimed.person, None);
        assert_eq!(aimed.bbox, aimed.object);
    }

    #[test]
    fn aim_mode_parses() {
        assert_eq!("person".parse::<AimMode>(), Ok(AimMode::NearestPerson));
        assert_eq!("Target".parse::<AimMode>(), Ok(AimMode::Target));
        assert!("elbow".parse::<AimMode>().is_err());
    }
}
