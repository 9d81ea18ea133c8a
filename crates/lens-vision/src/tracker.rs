use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::FaceDetection;

const ID_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random session-scoped face id. Uniqueness is probabilistic only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(String);

impl FaceId {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let s = (0..ID_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Take the first previous face passing the policy, in previous-frame order.
    #[default]
    FirstMatch,
    /// Take the closest previous face passing the policy.
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SameFacePolicy {
    pub threshold: f32,
    pub require_same_gender: bool,
}

impl Default for SameFacePolicy {
    fn default() -> Self {
        Self { threshold: 0.6, require_same_gender: true }
    }
}

impl SameFacePolicy {
    /// Descriptor distance if the pair passes the policy.
    pub fn distance_if_same(&self, prev: &FaceDetection, cur: &FaceDetection) -> Option<f32> {
        if self.require_same_gender && prev.gender != cur.gender {
            return None;
        }
        let d = euclidean_distance(&prev.descriptor, &cur.descriptor)?;
        (d < self.threshold).then_some(d)
    }

    pub fn is_same_face(&self, prev: &FaceDetection, cur: &FaceDetection) -> bool {
        self.distance_if_same(prev, cur).is_some()
    }
}

/// `None` when the descriptors come from different embedding sizes.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Some(sum.sqrt())
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFace {
    pub detection: FaceDetection,
    pub id: FaceId,
    pub label: Option<String>,
    /// False when this frame created the id.
    pub matched: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    #[serde(flatten)]
    pub policy: SameFacePolicy,
    pub strategy: MatchStrategy,
}

/// Frame-to-frame face identity with one frame of history. A face matching a previous one
/// inherits its id and label; anything else gets a fresh random id.
#[derive(Debug)]
pub struct FaceTracker {
    cfg: TrackingConfig,
    previous: Vec<TrackedFace>,
    issued: u64,
}

impl FaceTracker {
    pub fn new(cfg: TrackingConfig) -> Self {
        Self { cfg, previous: Vec::new(), issued: 0 }
    }

    pub fn previous(&self) -> &[TrackedFace] {
        &self.previous
    }

    /// Number of ids handed out this session.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Assign identities to this frame's faces and make them the history for the next frame.
    ///
    /// `label_new` is asked for a label whenever a face ends up without one, either because it
    /// is new or because the face it matched was never labelled.
    pub fn track<R, F>(&mut self, current: Vec<FaceDetection>, rng: &mut R, mut label_new: F) -> &[TrackedFace]
    where
        R: Rng,
        F: FnMut(&FaceDetection) -> Option<String>,
    {
        let mut tracked = Vec::with_capacity(current.len());
        for det in current {
            let inherited = self
                .find_match(&det)
                .map(|prev| (prev.id.clone(), prev.label.clone()));
            let (id, label, matched) = match inherited {
                Some((id, label)) => (id, label, true),
                None => (self.fresh_id(rng), None, false),
            };
            let label = label.or_else(|| label_new(&det));
            debug!(id = %id, matched, "face tracked");
            tracked.push(TrackedFace { detection: det, id, label, matched });
        }
        self.previous = tracked;
        &self.previous
    }

    fn find_match(&self, det: &FaceDetection) -> Option<&TrackedFace> {
        let policy = &self.cfg.policy;
        match self.cfg.strategy {
            MatchStrategy::FirstMatch => self
                .previous
                .iter()
                .find(|p| policy.is_same_face(&p.detection, det)),
            MatchStrategy::Nearest => self
                .previous
                .iter()
                .filter_map(|p| policy.distance_if_same(&p.detection, det).map(|d| (d, p)))
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(_, p)| p),
        }
    }

    fn fresh_id<R: Rng>(&mut self, rng: &mut R) -> FaceId {
        loop {
            let id = FaceId::random(rng);
            if !self.previous.iter().any(|p| p.id == id) {
                self.issued += 1;
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Gender;
    use crate::geometry::BBox;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn face(descriptor: Vec<f32>, gender: Gender) -> FaceDetection {
        FaceDetection {
            bbox: BBox::new(10.0, 10.0, 40.0, 40.0),
            score: 0.9,
            descriptor,
            age: 30.0,
            gender,
            gender_probability: 0.95,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn ids_are_nine_base36_chars() {
        let id = FaceId::random(&mut rng());
        assert_eq!(id.as_str().len(), 9);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn same_face_respects_threshold_and_gender() {
        let p = SameFacePolicy::default();
        let a = face(vec![0.0, 0.0], Gender::Male);
        assert!(p.is_same_face(&a, &face(vec![0.3, 0.0], Gender::Male)));
        assert!(!p.is_same_face(&a, &face(vec![0.3, 0.0], Gender::Female)));
        assert!(!p.is_same_face(&a, &face(vec![0.75, 0.0], Gender::Male)));
        assert!(!p.is_same_face(&a, &face(vec![0.9, 0.0], Gender::Female)));

        let ungated = SameFacePolicy { require_same_gender: false, ..p };
        assert!(ungated.is_same_face(&a, &face(vec![0.3, 0.0], Gender::Female)));
        assert!(!ungated.is_same_face(&a, &face(vec![0.75, 0.0], Gender::Female)));
    }

    #[test]
    fn distance_at_threshold_is_not_a_match() {
        let p = SameFacePolicy::default();
        let a = face(vec![0.0, 0.0], Gender::Male);
        let b = face(vec![0.6, 0.0], Gender::Male);
        assert_eq!(euclidean_distance(&a.descriptor, &b.descriptor), Some(0.6));
        assert!(!p.is_same_face(&a, &b));
        assert_eq!(p.distance_if_same(&a, &b), None);
    }

    #[test]
    fn mismatched_descriptor_lengths_never_match() {
        let p = SameFacePolicy::default();
        assert!(!p.is_same_face(&face(vec![0.0], Gender::Male), &face(vec![0.0, 0.0], Gender::Male)));
    }

    #[test]
    fn identity_survives_a_close_descriptor() {
        let mut rng = rng();
        let mut t = FaceTracker::new(TrackingConfig::default());
        let first = t.track(vec![face(vec![0.1, 0.2, 0.3], Gender::Female)], &mut rng, |_| Some("Ada".into()))[0].clone();
        assert!(!first.matched);

        let second = t.track(vec![face(vec![0.1, 0.5, 0.3], Gender::Female)], &mut rng, |_| Some("other".into()))[0].clone();
        assert!(second.matched);
        assert_eq!(second.id, first.id);
        assert_eq!(second.label.as_deref(), Some("Ada"));
        assert_eq!(t.issued(), 1);
    }

    #[test]
    fn distant_face_gets_fresh_id_without_inherited_label() {
        let mut rng = rng();
        let mut t = FaceTracker::new(TrackingConfig::default());
        let first = t.track(vec![face(vec![0.0, 0.0], Gender::Male)], &mut rng, |_| Some("A".into()))[0].clone();
        let second = t.track(vec![face(vec![1.0, 1.0], Gender::Male)], &mut rng, |_| None)[0].clone();
        assert_ne!(second.id, first.id);
        assert_eq!(second.label, None);
        assert!(!second.matched);
    }

    #[test]
    fn history_is_only_one_frame_deep() {
        let mut rng = rng();
        let mut t = FaceTracker::new(TrackingConfig::default());
        let a = t.track(vec![face(vec![0.0, 0.0], Gender::Male)], &mut rng, |_| None)[0].id.clone();
        t.track(Vec::new(), &mut rng, |_| None);
        assert!(t.previous().is_empty());
        let b = t.track(vec![face(vec![0.0, 0.0], Gender::Male)], &mut rng, |_| None)[0].id.clone();
        assert_ne!(a, b);
    }

    #[test]
    fn first_match_and_nearest_can_disagree() {
        let mut rng = rng();
        let prev = vec![face(vec![0.5, 0.0], Gender::Male), face(vec![0.1, 0.0], Gender::Male)];
        let cur = || vec![face(vec![0.0, 0.0], Gender::Male)];

        let mut first = FaceTracker::new(TrackingConfig::default());
        let ids: Vec<_> = first.track(prev.clone(), &mut rng, |_| None).iter().map(|f| f.id.clone()).collect();
        assert_eq!(first.track(cur(), &mut rng, |_| None)[0].id, ids[0]);

        let mut nearest = FaceTracker::new(TrackingConfig { strategy: MatchStrategy::Nearest, ..Default::default() });
        let ids: Vec<_> = nearest.track(prev, &mut rng, |_| None).iter().map(|f| f.id.clone()).collect();
        assert_eq!(nearest.track(cur(), &mut rng, |_| None)[0].id, ids[1]);
    }

    #[test]
    fn new_ids_are_distinct_across_many_faces() {
        let mut rng = rng();
        let mut t = FaceTracker::new(TrackingConfig::default());
        let mut seen = HashSet::new();
        for i in 0..200 {
            // each frame's face is far from the last one
            let d = vec![(i % 2) as f32 * 10.0, i as f32];
            let f = t.track(vec![face(d, Gender::Male)], &mut rng, |_| None)[0].clone();
            assert!(!f.matched);
            assert!(seen.insert(f.id));
        }
    }
}
