//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Greedy IoU/distance multi-object tracker. Associates each frame's
//! detections against the active track set, ages out unmatched tracks, and
//! classifies direction/zone from smoothed recent positions.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::ConfigSnapshot;
use crate::detect::{BoundingBox, Detection};

const MAX_HISTORY: usize = 30;
const DIRECTION_WINDOW: usize = 5;
const MIN_SPEED: f32 = 0.01;
const DOMINANCE_RATIO: f32 = 1.5;
const HORIZONTAL_EXIT_HIGH: f32 = 0.85;
const HORIZONTAL_EXIT_LOW: f32 = 0.15;
const VERTICAL_EXIT_HIGH: f32 = 0.85;
const VERTICAL_EXIT_LOW: f32 = 0.15;
const DIAGONAL_EDGE_HIGH: f32 = 0.8;
const DIAGONAL_EDGE_LOW: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    New,
    Tracked,
    Lost,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unknown,
    Stationary,
    Left,
    Right,
    Up,
    Down,
    Approaching,
    Leaving,
    Entering,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    MiddleCenter,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Zone {
    pub fn from_point(x: f32, y: f32) -> Zone {
        let h = if x < 0.33 {
            0
        } else if x < 0.66 {
            1
        } else {
            2
        };
        let v = if y < 0.33 {
            0
        } else if y < 0.66 {
            1
        } else {
            2
        };
        match (v, h) {
            (0, 0) => Zone::TopLeft,
            (0, 1) => Zone::TopCenter,
            (0, 2) => Zone::TopRight,
            (1, 0) => Zone::MiddleLeft,
            (1, 1) => Zone::MiddleCenter,
            (1, 2) => Zone::MiddleRight,
            (2, 0) => Zone::BottomLeft,
            (2, 1) => Zone::BottomCenter,
            _ => Zone::BottomRight,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Zone::TopLeft => "top_left",
            Zone::TopCenter => "top_center",
            Zone::TopRight => "top_right",
            Zone::MiddleLeft => "middle_left",
            Zone::MiddleCenter => "middle_center",
            Zone::MiddleRight => "middle_right",
            Zone::BottomLeft => "bottom_left",
            Zone::BottomCenter => "bottom_center",
            Zone::BottomRight => "bottom_right",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: u64,
    pub class: String,
    pub bbox: BoundingBox,
    pub state: TrackState,
    pub direction: Direction,
    pub zone: Zone,
    pub entry_zone: Option<Zone>,
    pub frames_tracked: u32,
    pub frames_lost: u32,
    pub first_seen: Instant,
    pub last_seen: Instant,
    history: Vec<Position>,
}

impl TrackedObject {
    fn new(id: u64, detection: &Detection, now: Instant) -> Self {
        let zone = Zone::from_point(detection.bbox.x, detection.bbox.y);
        TrackedObject {
            id,
            class: detection.class.clone(),
            bbox: detection.bbox,
            state: TrackState::New,
            direction: Direction::Entering,
            zone,
            entry_zone: Some(zone),
            frames_tracked: 1,
            frames_lost: 0,
            first_seen: now,
            last_seen: now,
            history: vec![Position { x: detection.bbox.x, y: detection.bbox.y, at: now }],
        }
    }

    fn update(&mut self, detection: &Detection, now: Instant, min_stable_frames: u32) {
        self.bbox = detection.bbox;
        self.class = detection.class.clone();
        self.frames_tracked += 1;
        self.frames_lost = 0;
        self.last_seen = now;
        self.history.push(Position { x: detection.bbox.x, y: detection.bbox.y, at: now });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        let new_zone = Zone::from_point(detection.bbox.x, detection.bbox.y);
        self.zone = new_zone;
        // entry_zone is recorded only while the track is still New.
        if self.state == TrackState::New {
            self.entry_zone = Some(new_zone);
        }

        self.direction = self.classify_direction();

        if self.state == TrackState::New && self.frames_tracked >= min_stable_frames {
            self.state = TrackState::Tracked;
        } else if self.state == TrackState::Lost {
            self.state = TrackState::Tracked;
        }
    }

    fn mark_unmatched(&mut self, max_lost_frames: u32) {
        self.frames_lost += 1;
        if self.state != TrackState::Gone {
            self.state = TrackState::Lost;
        }
        if self.frames_lost >= max_lost_frames {
            self.state = TrackState::Gone;
        }
    }

    fn classify_direction(&self) -> Direction {
        let window: Vec<&Position> = self
            .history
            .iter()
            .rev()
            .take(DIRECTION_WINDOW)
            .collect();
        if window.len() < 2 {
            return Direction::Entering;
        }
        let newest = window[0];
        let oldest = window[window.len() - 1];
        let dt = newest.at.duration_since(oldest.at).as_secs_f32();
        if dt <= 0.0 {
            return self.direction;
        }
        let vx = (newest.x - oldest.x) / dt;
        let vy = (newest.y - oldest.y) / dt;
        let speed = (vx * vx + vy * vy).sqrt();

        if speed < MIN_SPEED {
            return Direction::Stationary;
        }

        let x = newest.x;
        let y = newest.y;

        if vx.abs() > DOMINANCE_RATIO * vy.abs() {
            if vx > 0.0 {
                if x > HORIZONTAL_EXIT_HIGH {
                    return Direction::Exiting;
                }
                return Direction::Right;
            } else {
                if x < HORIZONTAL_EXIT_LOW {
                    return Direction::Exiting;
                }
                return Direction::Left;
            }
        }

        if vy.abs() > DOMINANCE_RATIO * vx.abs() {
            if vy > 0.0 {
                if y > VERTICAL_EXIT_HIGH {
                    return Direction::Approaching;
                }
                return Direction::Down;
            } else {
                if y < VERTICAL_EXIT_LOW {
                    return Direction::Leaving;
                }
                return Direction::Up;
            }
        }

        // Diagonal motion: classify by edge proximity. Only x signals
        // exiting here; y separately signals approaching/leaving. Neither
        // edge close enough keeps the previous direction.
        if x > DIAGONAL_EDGE_HIGH || x < DIAGONAL_EDGE_LOW {
            Direction::Exiting
        } else if y > DIAGONAL_EDGE_HIGH {
            Direction::Approaching
        } else if y < DIAGONAL_EDGE_LOW {
            Direction::Leaving
        } else {
            self.direction
        }
    }

    /// Human-readable one-line summary used by the describer when no
    /// vision-language summary is available.
    pub fn summary(&self) -> String {
        let direction = match self.direction {
            Direction::Unknown => "unknown",
            Direction::Stationary => "stationary",
            Direction::Left => "moving left",
            Direction::Right => "moving right",
            Direction::Up => "moving up",
            Direction::Down => "moving down",
            Direction::Approaching => "approaching",
            Direction::Leaving => "leaving",
            Direction::Entering => "entering",
            Direction::Exiting => "exiting",
        };
        format!("{} {} in {}", self.class, direction, self.zone.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Entry(u64),
    Exit(u64),
    ZoneEnter(u64, &'static str),
}

#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub active: Vec<TrackedObject>,
    pub new_objects: Vec<u64>,
    pub lost_objects: Vec<u64>,
    pub events: Vec<Event>,
    pub total_tracked_ever: u64,
    pub active_count: usize,
}

pub struct ObjectTracker {
    tracks: HashMap<u64, TrackedObject>,
    next_id: u64,
    total_ever: u64,
    iou_threshold: f32,
    distance_threshold: f32,
    max_lost_frames: u32,
    min_stable_frames: u32,
}

impl ObjectTracker {
    pub fn new(cfg: &ConfigSnapshot) -> Self {
        ObjectTracker {
            tracks: HashMap::new(),
            next_id: 1,
            total_ever: 0,
            iou_threshold: cfg.iou_threshold,
            distance_threshold: cfg.distance_threshold,
            max_lost_frames: cfg.max_lost_frames,
            min_stable_frames: cfg.min_stable_frames,
        }
    }

    pub fn update(&mut self, detections: &[Detection]) -> TrackingResult {
        let now = Instant::now();
        let mut scores: Vec<(f32, u64, usize)> = Vec::new();

        for (&id, track) in &self.tracks {
            if track.state == TrackState::Gone {
                continue;
            }
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                let dist = track.bbox.center_distance(&det.bbox);
                if iou >= self.iou_threshold || dist <= self.distance_threshold {
                    let score = iou + (1.0 - dist).max(0.0);
                    scores.push((score, id, di));
                }
            }
        }
        // Descending score; ties broken by smaller detection index, then
        // smaller track id, for determinism.
        scores.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap()
                .then(a.2.cmp(&b.2))
                .then(a.1.cmp(&b.1))
        });

        let mut matched_tracks = std::collections::HashSet::new();
        let mut matched_dets = std::collections::HashSet::new();
        let mut assignments: Vec<(u64, usize)> = Vec::new();
        for (_, track_id, det_idx) in scores {
            if matched_tracks.contains(&track_id) || matched_dets.contains(&det_idx) {
                continue;
            }
            matched_tracks.insert(track_id);
            matched_dets.insert(det_idx);
            assignments.push((track_id, det_idx));
        }

        let mut events = Vec::new();
        let mut new_objects = Vec::new();
        let mut lost_objects = Vec::new();

        for (track_id, det_idx) in &assignments {
            let det = &detections[*det_idx];
            let prev_zone = self.tracks[track_id].zone;
            if let Some(track) = self.tracks.get_mut(track_id) {
                track.update(det, now, self.min_stable_frames);
                if track.zone != prev_zone {
                    events.push(Event::ZoneEnter(*track_id, track.zone.label()));
                }
            }
        }

        for (id, track) in self.tracks.iter_mut() {
            if !matched_tracks.contains(id) {
                let was_active = track.state != TrackState::Gone;
                track.mark_unmatched(self.max_lost_frames);
                if was_active && track.state == TrackState::Gone {
                    events.push(Event::Exit(*id));
                    lost_objects.push(*id);
                }
            }
        }

        for (det_idx, det) in detections.iter().enumerate() {
            if matched_dets.contains(&det_idx) {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.total_ever += 1;
            self.tracks.insert(id, TrackedObject::new(id, det, now));
            new_objects.push(id);
            events.push(Event::Entry(id));
        }

        self.tracks.retain(|_, t| t.state != TrackState::Gone);

        let active: Vec<TrackedObject> = self
            .tracks
            .values()
            .filter(|t| t.state != TrackState::Gone)
            .cloned()
            .collect();

        TrackingResult {
            active_count: active.len(),
            active,
            new_objects,
            lost_objects,
            events,
            total_tracked_ever: self.total_ever,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x, y, w: 0.1, h: 0.1 },
            class: "object".into(),
            confidence: 0.9,
            class_id: None,
        }
    }

    #[test]
    fn new_detection_spawns_a_track_with_entering_direction() {
        let cfg = ConfigSnapshot::default_validated();
        let mut tracker = ObjectTracker::new(&cfg);
        let result = tracker.update(&[det(0.5, 0.5)]);
        assert_eq!(result.active.len(), 1);
        assert_eq!(result.active[0].direction, Direction::Entering);
        assert_eq!(result.new_objects, vec![1]);
    }

    #[test]
    fn same_object_across_frames_keeps_its_id() {
        let cfg = ConfigSnapshot::default_validated();
        let mut tracker = ObjectTracker::new(&cfg);
        tracker.update(&[det(0.5, 0.5)]);
        let result = tracker.update(&[det(0.51, 0.5)]);
        assert_eq!(result.active.len(), 1);
        assert_eq!(result.active[0].id, 1);
    }

    #[test]
    fn unmatched_track_goes_lost_then_gone_after_max_lost_frames() {
        let mut raw = crate::config::RawConfig::default();
        raw.max_lost_frames = 2;
        let cfg = ConfigSnapshot::validate(raw).unwrap();
        let mut tracker = ObjectTracker::new(&cfg);
        tracker.update(&[det(0.5, 0.5)]);
        let r1 = tracker.update(&[]);
        assert_eq!(r1.active.len(), 1);
        assert_eq!(r1.active[0].state, TrackState::Lost);
        let r2 = tracker.update(&[]);
        assert_eq!(r2.active.len(), 0);
        assert_eq!(r2.lost_objects, vec![1]);
    }

    #[test]
    fn zone_from_point_matches_normalized_thirds() {
        assert_eq!(Zone::from_point(0.1, 0.1), Zone::TopLeft);
        assert_eq!(Zone::from_point(0.5, 0.5), Zone::MiddleCenter);
        assert_eq!(Zone::from_point(0.9, 0.9), Zone::BottomRight);
    }
}
