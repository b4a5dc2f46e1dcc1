use crate::emitter::Snapshot;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Average stride, meters per step, used when no explicit distance is supplied
pub const METERS_PER_STEP: f64 = 0.762;
/// Rough energy estimate, kcal per step, used when no explicit value is supplied
pub const CALORIES_PER_STEP: f64 = 0.04;
/// Default daily step goal
pub const DEFAULT_DAILY_GOAL: i32 = 10_000;

/// In-memory aggregate for the current counting period.
///
/// Mutated only from the sensor callback path and the patch channel; the host
/// serializes both, so the struct carries no locking of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSession {
    pub steps: f64,
    pub distance: f64,
    pub calories: f64,
    pub daily_goal: i32,
    /// Epoch millis bounding the counting window
    pub start_date: i64,
    pub end_date: i64,
}

impl StepSession {
    pub fn new() -> Self {
        Self {
            steps: 0.0,
            distance: 0.0,
            calories: 0.0,
            daily_goal: DEFAULT_DAILY_GOAL,
            start_date: 0,
            end_date: 0,
        }
    }

    /// Open the counting window at the current wall clock
    pub fn open_window(&mut self) {
        self.start_date = Utc::now().timestamp_millis();
        self.end_date = self.start_date;
    }

    /// Fold a sensor-driven step count into the session.
    ///
    /// Derived fields are recomputed from the new count; the window end
    /// advances to `wall_clock_ms`. Callers must pass epoch millis, not the
    /// boot-relative sensor timestamp, or the window inverts.
    pub fn record_steps(&mut self, steps: f64, wall_clock_ms: i64) {
        self.steps = steps;
        self.distance = steps * METERS_PER_STEP;
        self.calories = steps * CALORIES_PER_STEP;
        self.end_date = wall_clock_ms;
    }

    /// Overwrite all fields from an out-of-band patch. Last writer wins.
    ///
    /// Absent distance/calories take the derived defaults for the patched
    /// step count; an absent goal resets to [`DEFAULT_DAILY_GOAL`]; absent
    /// dates keep the current window.
    pub fn apply_patch(&mut self, patch: &SessionPatch) {
        self.steps = patch.steps;
        self.distance = patch
            .distance
            .unwrap_or(patch.steps * METERS_PER_STEP);
        self.calories = patch
            .calories
            .unwrap_or(patch.steps * CALORIES_PER_STEP);
        self.daily_goal = patch.daily_goal.unwrap_or(DEFAULT_DAILY_GOAL);
        if let Some(start) = patch.start_date {
            self.start_date = start;
        }
        if let Some(end) = patch.end_date {
            self.end_date = end;
        }
    }

    /// Point-in-time copy for emission
    pub fn snapshot(&self, counter_type: &str) -> Snapshot {
        Snapshot {
            steps: self.steps,
            distance: self.distance,
            start_date: self.start_date,
            end_date: self.end_date,
            counter_type: counter_type.to_string(),
            calories: self.calories,
            daily_goal: self.daily_goal,
        }
    }
}

impl Default for StepSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed state patch pushed through the refresh channel.
///
/// Replaces the original's untyped broadcast extras: `steps` is required,
/// everything else falls back per [`StepSession::apply_patch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPatch {
    pub steps: f64,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default, rename = "dailyGoal")]
    pub daily_goal: Option<i32>,
    #[serde(default, rename = "startDate")]
    pub start_date: Option<i64>,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<i64>,
}

impl SessionPatch {
    pub fn with_steps(steps: f64) -> Self {
        Self {
            steps,
            distance: None,
            calories: None,
            daily_goal: None,
            start_date: None,
            end_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_record_steps_derives_fields() {
        let mut session = StepSession::new();
        session.record_steps(100.0, 5_000);

        assert_relative_eq!(session.steps, 100.0);
        assert_relative_eq!(session.distance, 76.2);
        assert_relative_eq!(session.calories, 4.0);
        assert_eq!(session.end_date, 5_000);
    }

    #[test]
    fn test_patch_missing_distance_and_calories_take_derived_defaults() {
        let mut session = StepSession::new();
        session.apply_patch(&SessionPatch::with_steps(500.0));

        assert_relative_eq!(session.distance, 500.0 * METERS_PER_STEP);
        assert_relative_eq!(session.calories, 500.0 * CALORIES_PER_STEP);
    }

    #[test]
    fn test_patch_missing_goal_resets_to_default() {
        let mut session = StepSession::new();
        session.daily_goal = 4_000;
        session.apply_patch(&SessionPatch::with_steps(10.0));

        assert_eq!(session.daily_goal, DEFAULT_DAILY_GOAL);
    }

    #[test]
    fn test_patch_explicit_fields_win_over_defaults() {
        let mut session = StepSession::new();
        let patch = SessionPatch {
            steps: 200.0,
            distance: Some(180.0),
            calories: Some(9.5),
            daily_goal: Some(12_000),
            start_date: Some(1_000),
            end_date: Some(2_000),
        };
        session.apply_patch(&patch);

        assert_relative_eq!(session.distance, 180.0);
        assert_relative_eq!(session.calories, 9.5);
        assert_eq!(session.daily_goal, 12_000);
        assert_eq!(session.start_date, 1_000);
        assert_eq!(session.end_date, 2_000);
    }

    #[test]
    fn test_patch_missing_dates_keep_window() {
        let mut session = StepSession::new();
        session.start_date = 111;
        session.end_date = 222;
        session.apply_patch(&SessionPatch::with_steps(1.0));

        assert_eq!(session.start_date, 111);
        assert_eq!(session.end_date, 222);
    }

    #[test]
    fn test_patch_json_shape_matches_bridge_payload() {
        let patch: SessionPatch =
            serde_json::from_str(r#"{"steps": 42.0, "dailyGoal": 8000}"#).unwrap();
        assert_relative_eq!(patch.steps, 42.0);
        assert_eq!(patch.daily_goal, Some(8_000));
        assert!(patch.distance.is_none());
    }
}
