use serde::{Deserialize, Deserializer, Serialize};
use target_core::TargetObservation;

/// Operator controls forwarded with every coordinate message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlState {
    /// Tracking enabled on the device (`button_state`).
    pub armed: bool,
    /// Momentary fire request.
    pub fire: bool,
}

/// JSON body POSTed to the actuator controller.
///
/// `rel_x`/`rel_y` are in `[-1, 1]` with the origin at the frame centre and
/// `rel_y` positive upwards. `abs_*`, `width` and `height` are in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateMessage {
    pub rel_x: f32,
    pub rel_y: f32,
    pub abs_x: i32,
    pub abs_y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
    pub button_state: u8,
    pub fire_command: u8,
}

impl CoordinateMessage {
    pub fn from_observation(observation: &TargetObservation, controls: ControlState) -> Self {
        let (cx, cy) = observation.bbox.center();
        let (rel_x, rel_y) =
            relative_offset(cx, cy, observation.frame_width, observation.frame_height);
        Self {
            rel_x,
            rel_y,
            abs_x: cx as i32,
            abs_y: cy as i32,
            width: observation.bbox.width() as i32,
            height: observation.bbox.height() as i32,
            confidence: observation.confidence,
            button_state: controls.armed.into(),
            fire_command: controls.fire.into(),
        }
    }

    /// Zeroed message telling the actuator to stop tracking. Fire is never
    /// forwarded with a stop.
    pub fn stop(controls: ControlState) -> Self {
        Self {
            rel_x: 0.0,
            rel_y: 0.0,
            abs_x: 0,
            abs_y: 0,
            width: 0,
            height: 0,
            confidence: 0.0,
            button_state: controls.armed.into(),
            fire_command: 0,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.rel_x == 0.0 && self.rel_y == 0.0 && self.confidence == 0.0
    }
}

/// Offset of `(cx, cy)` from the frame centre, normalised by half the frame
/// size and clamped to `[-1, 1]`. Degenerate frames map to the centre.
pub fn relative_offset(cx: f32, cy: f32, frame_width: i32, frame_height: i32) -> (f32, f32) {
    if frame_width <= 0 || frame_height <= 0 {
        return (0.0, 0.0);
    }
    let half_w = frame_width as f32 / 2.0;
    let half_h = frame_height as f32 / 2.0;
    let rel_x = ((cx - half_w) / half_w).clamp(-1.0, 1.0);
    let rel_y = ((half_h - cy) / half_h).clamp(-1.0, 1.0);
    (rel_x, rel_y)
}

/// State the device reports back after applying a message.
///
/// Firmware revisions disagree on which optional fields are present, so the
/// echo is only ever logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Echo {
    #[serde(default)]
    pub rel_x: f32,
    #[serde(default)]
    pub rel_y: f32,
    #[serde(default, deserialize_with = "flag")]
    pub button_state: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EchoEnvelope {
    #[serde(default)]
    pub echo: Option<Echo>,
}

/// Accepts `true`/`false` as well as `0`/`1`.
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(Option::<Flag>::deserialize(deserializer)?.map(|flag| match flag {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    }))
}
