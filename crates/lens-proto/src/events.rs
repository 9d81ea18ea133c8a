use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// One per processed frame.
    Frame {
        objects: usize,
        faces: usize,
        new_faces: usize,
        regions: usize,
    },
    /// Tick where no usable frame was available.
    Idle { reason: String },
    /// A face was seen for the first time.
    NewFace {
        face_id: String,
        label: Option<String>,
        gender: String,
        age: f32,
    },
    /// A click landed on a rendered detection.
    DescriptionShown {
        region: String,
        category: String,
        label: String,
        face_id: Option<String>,
        text: Option<String>,
        media: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayEvent {
    pub ts_unix_ms: i64,
    pub frame: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OverlayEvent {
    pub fn now(frame: u64, kind: EventKind) -> Self {
        Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            frame,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_flattened_into_the_record() {
        let ev = OverlayEvent {
            ts_unix_ms: 5,
            frame: 9,
            kind: EventKind::Idle { reason: "no frame".into() },
        };
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "idle");
        assert_eq!(v["frame"], 9);
        assert_eq!(v["reason"], "no frame");
    }
}
