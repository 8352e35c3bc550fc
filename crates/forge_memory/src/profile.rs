//! Cross-project feel profile.
//!
//! The profile is a prior for feel-spec generation: it summarizes what past
//! sessions chose, liked and rejected. Downstream stages may override it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::note::{MemoryNote, UserPreference};

const LIST_CAP: usize = 15;
const TIGHT_RATIO: f64 = 0.85;
const FLOATY_RATIO: f64 = 0.5;

/// Averaged numeric tendencies from past feel specs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningTendencies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_gravity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_drag_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_preset: Option<String>,
}

/// Aggregated user feel profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeelProfile {
    /// tight | floaty | arcade, or a preset name when no ratios exist.
    pub style_tendency: Option<String>,
    pub device_preference: Option<String>,
    pub input_preference: Option<String>,
    pub session_length: Option<String>,
    /// strong | moderate | minimal
    pub feedback_level: Option<String>,
    pub likes: Vec<String>,
    pub dislikes: Vec<String>,
    pub tuning_tendencies: TuningTendencies,
    pub session_count: usize,
}

impl FeelProfile {
    /// Whether there is anything to bias with.
    pub fn is_empty(&self) -> bool {
        self.session_count == 0
            && self.device_preference.is_none()
            && self.input_preference.is_none()
            && self.session_length.is_none()
            && self.feedback_level.is_none()
    }
}

/// Vote counter that remembers first-seen order, so ties go to the value
/// seen first (the newest record).
#[derive(Default)]
struct Votes(Vec<(String, usize)>);

impl Votes {
    fn add(&mut self, value: &str) {
        match self.0.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => self.0.push((value.to_string(), 1)),
        }
    }

    fn winner(&self) -> Option<String> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.0 {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(v, _)| v.clone())
    }
}

fn feedback_for_pace(pace: &str) -> &'static str {
    match pace {
        "fast" => "strong",
        "medium" => "moderate",
        "slow" | "idle" => "minimal",
        _ => "moderate",
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

/// Aggregate a profile from recent notes and preference records, both
/// newest first.
pub fn aggregate_user_feel_profile(
    notes: &[MemoryNote],
    preferences: &[UserPreference],
) -> FeelProfile {
    let mut profile = FeelProfile {
        session_count: notes.len(),
        ..Default::default()
    };

    let mut platform = Votes::default();
    let mut input = Votes::default();
    let mut pace = Votes::default();
    let mut session = Votes::default();
    for record in preferences {
        if let Some(v) = record.get_str("platform") {
            platform.add(v);
        }
        if let Some(v) = record.get_str("input") {
            input.add(v);
        }
        if let Some(v) = record.get_str("pace") {
            pace.add(v);
        }
        if let Some(v) = record.get_str("session_length") {
            session.add(v);
        }
    }
    profile.device_preference = platform.winner();
    profile.input_preference = input.winner();
    profile.session_length = session.winner();
    profile.feedback_level = pace.winner().map(|p| feedback_for_pace(&p).to_string());

    let mut likes = BTreeSet::new();
    let mut dislikes = BTreeSet::new();
    let mut gravity = Vec::new();
    let mut ratios = Vec::new();
    let mut presets = Votes::default();

    for note in notes {
        let content = &note.content;
        likes.extend(content.validated_hypotheses.iter().cloned());
        dislikes.extend(content.rejected_hypotheses.iter().cloned());
        dislikes.extend(content.pitfalls_and_guards.iter().cloned());

        let Some(spec) = content.feel_spec.as_ref().and_then(Value::as_object) else {
            continue;
        };

        if let Some(g) = number(spec.get("jump_model").and_then(|j| j.get("gravity"))) {
            gravity.push(g);
        }

        if let Some(movement) = spec.get("movement_model") {
            let accel = number(movement.get("accel")).unwrap_or(0.0);
            let drag = number(movement.get("drag")).unwrap_or(0.0);
            if accel > 0.0 {
                ratios.push(drag / accel);
            }
        }

        if let Some(preset) = spec
            .get("tuning")
            .and_then(|t| t.get("default_preset"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
        {
            presets.add(preset);
        }
    }

    profile.likes = likes.into_iter().take(LIST_CAP).collect();
    profile.dislikes = dislikes.into_iter().take(LIST_CAP).collect();

    if !gravity.is_empty() {
        let avg = gravity.iter().sum::<f64>() / gravity.len() as f64;
        profile.tuning_tendencies.avg_gravity = Some(avg.round() as i64);
    }
    if !ratios.is_empty() {
        let avg = ratios.iter().sum::<f64>() / ratios.len() as f64;
        profile.tuning_tendencies.avg_drag_ratio = Some((avg * 100.0).round() / 100.0);
        let style = if avg >= TIGHT_RATIO {
            "tight"
        } else if avg <= FLOATY_RATIO {
            "floaty"
        } else {
            "arcade"
        };
        profile.style_tendency = Some(style.to_string());
    }
    if let Some(preset) = presets.winner() {
        if profile.style_tendency.is_none() {
            profile.style_tendency = Some(preset.clone());
        }
        profile.tuning_tendencies.preferred_preset = Some(preset);
    }

    profile
}
