//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Turns a [`crate::tracker::TrackingResult`] plus an optional cascade
//! summary into at most one [`Observation`] per frame, suppressing
//! repeats whose summary hasn't materially changed and the active track
//! set hasn't moved.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::tracker::TrackingResult;

#[derive(Debug, Clone)]
pub struct Trigger {
    pub pattern: String,
    pub action: TriggerAction,
    pub cooldown_secs: f64,
    last_triggered: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Notify,
    Webhook,
    Record,
}

impl Trigger {
    pub fn new(pattern: impl Into<String>, action: TriggerAction, cooldown_secs: f64) -> Self {
        Trigger {
            pattern: pattern.into(),
            action,
            cooldown_secs,
            last_triggered: None,
        }
    }

    fn matches(&mut self, summary: &str, now: Instant) -> bool {
        if !summary.to_lowercase().contains(&self.pattern.to_lowercase()) {
            return false;
        }
        if let Some(last) = self.last_triggered
            && now.duration_since(last).as_secs_f64() < self.cooldown_secs
        {
            return false;
        }
        self.last_triggered = Some(now);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub frame_seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub summary: String,
    pub description: Option<String>,
    pub triggered: bool,
    pub matched_triggers: Vec<String>,
}

pub struct Describer {
    prev_summary: Option<String>,
    prev_active_ids: HashSet<u64>,
    triggers: Vec<Trigger>,
    similarity_threshold: f64,
}

impl Describer {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Describer {
            prev_summary: None,
            prev_active_ids: HashSet::new(),
            triggers,
            similarity_threshold: 0.6,
        }
    }

    /// Returns `Some(Observation)` iff the new summary is materially
    /// different from the previously accepted one, or the active track set
    /// has changed (a spawn or an exit since the last frame).
    pub fn observe(
        &mut self,
        tracking: &TrackingResult,
        cascade_summary: Option<&str>,
    ) -> Option<Observation> {
        let active_ids: HashSet<u64> = tracking.active.iter().map(|t| t.id).collect();
        let track_set_changed = active_ids != self.prev_active_ids;

        let summary = cascade_summary
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback_summary(tracking));

        let summary_changed = match &self.prev_summary {
            None => true,
            Some(prev) => token_similarity(prev, &summary) < self.similarity_threshold,
        };

        self.prev_active_ids = active_ids;

        if !track_set_changed && !summary_changed {
            return None;
        }
        self.prev_summary = Some(summary.clone());

        let now = Instant::now();
        let mut matched = Vec::new();
        for trigger in &mut self.triggers {
            if trigger.matches(&summary, now) {
                matched.push(trigger.pattern.clone());
            }
        }

        Some(Observation {
            frame_seq: 0,
            timestamp: chrono::Utc::now(),
            summary,
            description: cascade_summary.map(|s| s.to_string()),
            triggered: !matched.is_empty(),
            matched_triggers: matched,
        })
    }
}

fn fallback_summary(tracking: &TrackingResult) -> String {
    if tracking.active.is_empty() {
        return "no_change".to_string();
    }
    tracking
        .active
        .iter()
        .map(|t| t.summary())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Jaccard similarity over lowercased whitespace tokens; cheap stand-in for
/// the semantic dedup check, sufficient to catch near-identical summaries
/// without pulling in an embedding model.
fn token_similarity(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        1.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackingResult;

    fn empty_result() -> TrackingResult {
        TrackingResult {
            active: Vec::new(),
            new_objects: Vec::new(),
            lost_objects: Vec::new(),
            events: Vec::new(),
            total_tracked_ever: 0,
            active_count: 0,
        }
    }

    #[test]
    fn first_observation_is_always_accepted() {
        let mut describer = Describer::new(vec![]);
        let obs = describer.observe(&empty_result(), Some("a cat sits still"));
        assert!(obs.is_some());
    }

    #[test]
    fn identical_repeated_summary_is_suppressed() {
        let mut describer = Describer::new(vec![]);
        describer.observe(&empty_result(), Some("a cat sits still"));
        let second = describer.observe(&empty_result(), Some("a cat sits still"));
        assert!(second.is_none());
    }

    #[test]
    fn trigger_match_sets_triggered_flag_with_cooldown() {
        let trigger = Trigger::new("cat", TriggerAction::Notify, 0.0);
        let mut describer = Describer::new(vec![trigger]);
        let obs = describer.observe(&empty_result(), Some("a cat sits still")).unwrap();
        assert!(obs.triggered);
        assert_eq!(obs.matched_triggers, vec!["cat".to_string()]);
    }
}
