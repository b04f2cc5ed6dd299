//! Watch-Wait state machine.
//!
//! ```text
//! IDLE     → register reads Waiting      → parse screen, alert once
//! WAITING  → same (question, options)    → nothing
//! WAITING  → new (question, options)     → alert again
//! WAITING  → register leaves Waiting     → back to IDLE, dedup key cleared
//! ```
//!
//! The tracker holds no I/O. The monitor feeds it the register state and the
//! parsed screen each tick and acts on the returned `Alert`.

use crate::prompt::{Prompt, WaitDetection, WaitReason};

/// Actionable prompts carry between this many options.
pub const MIN_CHOICES: usize = 2;
pub const MAX_CHOICES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Waiting,
}

/// A notification the monitor should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub reason: Option<WaitReason>,
    pub prompt: Option<Prompt>,
}

impl Alert {
    /// The prompt, when it can be offered as a set of choices.
    pub fn choices(&self) -> Option<&Prompt> {
        self.prompt
            .as_ref()
            .filter(|p| (MIN_CHOICES..=MAX_CHOICES).contains(&p.options.len()))
    }
}

#[derive(Debug)]
pub struct WaitTracker {
    state: WatchState,
    last_key: Option<Prompt>,
}

impl Default for WaitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitTracker {
    pub fn new() -> Self {
        Self {
            state: WatchState::Idle,
            last_key: None,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// The register shows anything but Waiting.
    pub fn on_not_waiting(&mut self) {
        self.state = WatchState::Idle;
        self.last_key = None;
    }

    /// The register shows Waiting; `screen` is what the pane displays now.
    ///
    /// Returns an alert at most once per distinct `(question, options)` pair
    /// within one Waiting period.
    pub fn on_waiting(&mut self, screen: &WaitDetection) -> Option<Alert> {
        self.state = WatchState::Waiting;

        let prompt = screen.prompt.clone();
        let key = prompt.clone().unwrap_or_default();
        if self.last_key.as_ref() == Some(&key) {
            return None;
        }
        self.last_key = Some(key);

        Some(Alert {
            reason: screen.reason,
            prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui(question: &str, options: &[&str]) -> WaitDetection {
        WaitDetection {
            waiting: true,
            reason: Some(WaitReason::AskUserQuestionUI),
            prompt: Some(Prompt {
                question: question.to_string(),
                options: options.iter().map(|o| o.to_string()).collect(),
            }),
        }
    }

    fn marker() -> WaitDetection {
        WaitDetection {
            waiting: true,
            reason: Some(WaitReason::Marker),
            prompt: None,
        }
    }

    #[test]
    fn starts_idle() {
        assert_eq!(WaitTracker::new().state(), WatchState::Idle);
    }

    #[test]
    fn same_prompt_alerts_once() {
        let mut t = WaitTracker::new();
        let screen = ui("Pick?", &["A", "B"]);

        let alert = t.on_waiting(&screen).unwrap();
        assert_eq!(alert.reason, Some(WaitReason::AskUserQuestionUI));
        assert_eq!(t.state(), WatchState::Waiting);
        assert!(t.on_waiting(&screen).is_none());
        assert!(t.on_waiting(&screen).is_none());
    }

    #[test]
    fn new_prompt_alerts_again() {
        let mut t = WaitTracker::new();
        t.on_waiting(&ui("Pick?", &["A", "B"])).unwrap();
        assert!(t.on_waiting(&ui("Pick?", &["A", "C"])).is_some());
        assert!(t.on_waiting(&ui("Other?", &["A", "C"])).is_some());
    }

    #[test]
    fn leaving_waiting_resets_dedup() {
        let mut t = WaitTracker::new();
        let screen = ui("Pick?", &["A", "B"]);
        t.on_waiting(&screen).unwrap();

        t.on_not_waiting();
        assert_eq!(t.state(), WatchState::Idle);
        assert!(t.on_waiting(&screen).is_some());
    }

    #[test]
    fn plain_marker_alerts_once_without_choices() {
        let mut t = WaitTracker::new();
        let alert = t.on_waiting(&marker()).unwrap();
        assert!(alert.prompt.is_none());
        assert!(alert.choices().is_none());
        assert!(t.on_waiting(&marker()).is_none());
        // Blank screen while the register says Waiting shares the empty key.
        assert!(t.on_waiting(&WaitDetection::default()).is_none());
    }

    #[test]
    fn choices_need_two_to_five_options() {
        let mut t = WaitTracker::new();
        assert!(t.on_waiting(&ui("q", &["only"])).unwrap().choices().is_none());
        assert!(t.on_waiting(&ui("q", &["a", "b"])).unwrap().choices().is_some());
        let six = ["1", "2", "3", "4", "5", "6"];
        assert!(t.on_waiting(&ui("q", &six)).unwrap().choices().is_none());
        let five = ["1", "2", "3", "4", "5"];
        assert!(t.on_waiting(&ui("q", &five)).unwrap().choices().is_some());
    }
}
