//! Deferred truncation of an item's event-groups.
//!
//! A window is computed from the item's timedeltas and an explicit policy and
//! returns the retained range; nothing is copied. Timedeltas are the elapsed
//! time since the previous event-group, so the span covered by groups `a..=b`
//! is the sum of `timedelta[a + 1..=b]`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

/// Which end of the sequence a truncated window keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    /// Keep the most recent event-groups; the oldest are dropped first.
    #[default]
    Latest,
    /// Keep the earliest event-groups; the newest are dropped first.
    Earliest,
}

/// Limits applied to every item when it is sliced.
///
/// Both limits may be set; the resulting window satisfies both. The anchor
/// event-group is always retained by the time limit, even when its own
/// neighbour is further away than `max_time_span`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowPolicy {
    pub max_event_groups: Option<usize>,
    /// Inclusive bound on the time covered by the retained event-groups.
    pub max_time_span: Option<f32>,
    pub anchor: WindowAnchor,
}

impl WindowPolicy {
    /// No truncation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Keep at most the `max_event_groups` most recent event-groups.
    pub fn last(max_event_groups: usize) -> Self {
        Self {
            max_event_groups: Some(max_event_groups),
            ..Default::default()
        }
    }

    pub fn with_max_time_span(mut self, max_time_span: f32) -> Self {
        self.max_time_span = Some(max_time_span);
        self
    }

    pub fn with_anchor(mut self, anchor: WindowAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_event_groups.is_none() && self.max_time_span.is_none()
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.max_event_groups == Some(0) {
            return Err(BatchError::InvalidWindow(
                "max_event_groups must be at least 1".to_string(),
            ));
        }
        if let Some(span) = self.max_time_span {
            if !span.is_finite() || span < 0.0 {
                return Err(BatchError::InvalidWindow(format!(
                    "max_time_span must be finite and non-negative, got {span}"
                )));
            }
        }
        Ok(())
    }
}

/// Range of `timedelta` (one entry per event-group) retained under `policy`.
///
/// Expects a policy that passed [`WindowPolicy::validate`].
pub fn apply_window(timedelta: &[f32], policy: &WindowPolicy) -> Range<usize> {
    let len = timedelta.len();
    if len == 0 || policy.is_unbounded() {
        return 0..len;
    }

    let by_count = policy.max_event_groups.unwrap_or(len).min(len);
    let keep = match policy.max_time_span {
        Some(max_span) => by_count.min(within_span(timedelta, max_span, policy.anchor)),
        None => by_count,
    };

    match policy.anchor {
        WindowAnchor::Latest => len - keep..len,
        WindowAnchor::Earliest => 0..keep,
    }
}

/// Number of event-groups, counted from the anchor, that fit in `max_span`.
fn within_span(timedelta: &[f32], max_span: f32, anchor: WindowAnchor) -> usize {
    let len = timedelta.len();
    let mut span = 0.0f32;
    let mut keep = 1;
    match anchor {
        WindowAnchor::Latest => {
            // Adding group k - 1 extends the span by the gap that ends at group k.
            for k in (1..len).rev() {
                span += timedelta[k];
                if span > max_span {
                    break;
                }
                keep += 1;
            }
        }
        WindowAnchor::Earliest => {
            for gap in &timedelta[1..] {
                span += gap;
                if span > max_span {
                    break;
                }
                keep += 1;
            }
        }
    }
    keep
}
