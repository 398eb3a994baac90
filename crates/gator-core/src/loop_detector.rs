//! `LoopDetector`: an auxiliary safety net independent of Judge verdicts,
//! watching step-iteration counts, response similarity, and recurring
//! state-transition patterns.

use std::collections::HashMap;

use crate::config::LoopAction;
use crate::session_log::SessionLogRecord;

/// What triggered a loop-detection hit, and the recommended action.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSignal {
    pub reason: String,
    pub action: LoopAction,
}

pub struct LoopDetector {
    enabled: bool,
    max_step_iterations: u32,
    similarity_threshold: f64,
    similarity_window: usize,
    min_transition_occurrences: u32,
    on_loop: LoopAction,
}

impl LoopDetector {
    pub fn new(
        enabled: bool,
        max_step_iterations: u32,
        similarity_threshold: f64,
        similarity_window: usize,
        min_transition_occurrences: u32,
        on_loop: LoopAction,
    ) -> Self {
        Self {
            enabled,
            max_step_iterations,
            similarity_threshold,
            similarity_window,
            min_transition_occurrences,
            on_loop,
        }
    }

    /// Check a single task's iteration count against the step bound.
    pub fn check_iterations(&self, task_id: &str, iteration: u32) -> Option<LoopSignal> {
        if !self.enabled || iteration < self.max_step_iterations {
            return None;
        }
        Some(LoopSignal {
            reason: format!(
                "task {task_id} reached {iteration} iterations (limit {})",
                self.max_step_iterations
            ),
            action: self.on_loop,
        })
    }

    /// Cosine similarity over token bags between the most recent
    /// `similarity_window` worker responses for one task. A score at or
    /// above `similarity_threshold` indicates the agent is repeating
    /// itself without making progress.
    pub fn check_similarity(&self, task_id: &str, recent_responses: &[String]) -> Option<LoopSignal> {
        if !self.enabled || recent_responses.len() < self.similarity_window.max(2) {
            return None;
        }

        let window = &recent_responses[recent_responses.len() - self.similarity_window..];
        let mut max_pairwise = 0.0f64;
        for i in 0..window.len() {
            for j in (i + 1)..window.len() {
                let score = cosine_similarity(&window[i], &window[j]);
                max_pairwise = max_pairwise.max(score);
            }
        }

        if max_pairwise >= self.similarity_threshold {
            Some(LoopSignal {
                reason: format!(
                    "task {task_id} responses are {max_pairwise:.2} similar over the last \
                     {} attempts (threshold {:.2})",
                    self.similarity_window, self.similarity_threshold
                ),
                action: self.on_loop,
            })
        } else {
            None
        }
    }

    /// Scan session-log transitions for a repeating state-transition
    /// pattern (e.g. RUNNING -> NEEDS_CONTINUATION -> RUNNING -> ...)
    /// recurring at least `min_transition_occurrences` times for one task.
    pub fn check_transition_pattern(&self, records: &[SessionLogRecord]) -> Option<LoopSignal> {
        if !self.enabled {
            return None;
        }

        let mut per_task_transitions: HashMap<String, Vec<String>> = HashMap::new();
        for record in records {
            if let SessionLogRecord::TaskUpdated { task_id, state, .. } = record {
                per_task_transitions
                    .entry(task_id.clone())
                    .or_default()
                    .push(state.clone());
            }
        }

        for (task_id, states) in &per_task_transitions {
            if states.len() < 4 {
                continue;
            }
            let mut pair_counts: HashMap<(String, String), u32> = HashMap::new();
            for window in states.windows(2) {
                let pair = (window[0].clone(), window[1].clone());
                *pair_counts.entry(pair).or_insert(0) += 1;
            }
            if let Some((pair, count)) = pair_counts
                .iter()
                .max_by_key(|(_, count)| **count)
            {
                if *count >= self.min_transition_occurrences {
                    return Some(LoopSignal {
                        reason: format!(
                            "task {task_id} repeats transition {} -> {} {count} times",
                            pair.0, pair.1
                        ),
                        action: self.on_loop,
                    });
                }
            }
        }

        None
    }
}

/// Cosine similarity over whitespace-tokenized word-frequency bags.
fn cosine_similarity(a: &str, b: &str) -> f64 {
    let bag_a = token_bag(a);
    let bag_b = token_bag(b);

    if bag_a.is_empty() || bag_b.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    for (token, count_a) in &bag_a {
        if let Some(count_b) = bag_b.get(token) {
            dot += (*count_a as f64) * (*count_b as f64);
        }
    }

    let norm_a: f64 = bag_a.values().map(|c| (*c as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = bag_b.values().map(|c| (*c as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn token_bag(text: &str) -> HashMap<String, u32> {
    let mut bag = HashMap::new();
    for token in text.split_whitespace() {
        *bag.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    bag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LoopDetector {
        LoopDetector::new(true, 5, 0.9, 3, 3, LoopAction::Escalate)
    }

    #[test]
    fn iteration_bound_triggers_at_limit() {
        let d = detector();
        assert!(d.check_iterations("t1", 4).is_none());
        assert!(d.check_iterations("t1", 5).is_some());
    }

    #[test]
    fn disabled_detector_never_triggers() {
        let d = LoopDetector::new(false, 1, 0.0, 1, 1, LoopAction::Escalate);
        assert!(d.check_iterations("t1", 100).is_none());
    }

    #[test]
    fn identical_responses_are_maximally_similar() {
        let d = detector();
        let responses = vec![
            "I will fix the bug now".to_string(),
            "I will fix the bug now".to_string(),
            "I will fix the bug now".to_string(),
        ];
        let signal = d.check_similarity("t1", &responses);
        assert!(signal.is_some());
    }

    #[test]
    fn distinct_responses_do_not_trigger() {
        let d = detector();
        let responses = vec![
            "implementing the parser module".to_string(),
            "writing unit tests for the scheduler".to_string(),
            "fixing a lifetime error in the worker".to_string(),
        ];
        assert!(d.check_similarity("t1", &responses).is_none());
    }

    #[test]
    fn repeating_transition_pattern_detected() {
        let d = detector();
        let now = chrono::Utc::now();
        let mk = |state: &str| SessionLogRecord::TaskUpdated {
            timestamp: now,
            session_id: "s1".into(),
            task_id: "t1".into(),
            state: state.into(),
            version: 0,
        };
        let records = vec![
            mk("RUNNING"),
            mk("NEEDS_CONTINUATION"),
            mk("RUNNING"),
            mk("NEEDS_CONTINUATION"),
            mk("RUNNING"),
            mk("NEEDS_CONTINUATION"),
        ];
        let signal = d.check_transition_pattern(&records);
        assert!(signal.is_some());
    }
}
