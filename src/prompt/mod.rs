//! Wait/done detection over captured pane text.
//!
//! Everything here is a pure function of the captured lines. Three wait
//! signals are recognised, strongest first:
//!
//! 1. A tagged block the worker prints on purpose:
//!    ```text
//!    PAW_ASK
//!    question: Which database?
//!    option: Postgres
//!    option: SQLite
//!    PAW_ASK_END
//!    ```
//! 2. A rendered selection UI: numbered option lines (`❯ 1. Orange`) followed
//!    by a key-hint footer (`Enter to select · Esc to cancel`).
//! 3. A bare `PAW_WAITING` line.
//!
//! A bare `PAW_DONE` line marks the task done.
//!
//! ## Segments
//!
//! The worker's transcript is split into segments by lines starting with
//! `⏺`. Only the most recent segment is authoritative: a marker printed in an
//! earlier segment has been superseded by newer output.

use std::sync::LazyLock;

use regex::Regex;

pub const WAITING_MARKER: &str = "PAW_WAITING";
pub const DONE_MARKER: &str = "PAW_DONE";
const ASK_START: &str = "PAW_ASK";
const ASK_END: &str = "PAW_ASK_END";
const SEGMENT_MARKER: char = '⏺';

/// How far above the first option the question may sit.
const QUESTION_LOOKBACK: usize = 6;
/// How far above the hint footer options are searched for.
const OPTION_LOOKBACK: usize = 40;

static OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[>❯›]\s*)?(\d+)\.\s+(.+)$").unwrap());

/// Why the worker is considered blocked on the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    PromptBlock,
    AskUserQuestionUI,
    Marker,
}

impl WaitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitReason::PromptBlock => "prompt_block",
            WaitReason::AskUserQuestionUI => "ask_user_question_ui",
            WaitReason::Marker => "marker",
        }
    }
}

/// A question with ordered options, recovered from the screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Prompt {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaitDetection {
    pub waiting: bool,
    pub reason: Option<WaitReason>,
    pub prompt: Option<Prompt>,
}

impl WaitDetection {
    fn idle() -> Self {
        Self::default()
    }

    fn found(reason: WaitReason, prompt: Option<Prompt>) -> Self {
        Self {
            waiting: true,
            reason: Some(reason),
            prompt,
        }
    }
}

/// Strip ANSI escape sequences from captured output.
pub fn strip_ansi(input: &str) -> String {
    // Matches CSI sequences (ESC [ ... final byte), OSC sequences (ESC ] ... ST),
    // and simple two-byte escapes (ESC + one char).
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]").unwrap()
    });
    ANSI_RE.replace_all(input, "").to_string()
}

/// Split captured pane text into clean lines.
pub fn screen_lines(captured: &str) -> Vec<String> {
    strip_ansi(captured)
        .lines()
        .map(|l| l.trim_end().to_string())
        .collect()
}

/// The lines of the most recent segment (the whole input if unsegmented).
fn latest_segment<S: AsRef<str>>(lines: &[S]) -> &[S] {
    let start = lines
        .iter()
        .rposition(|l| l.as_ref().trim_start().starts_with(SEGMENT_MARKER))
        .unwrap_or(0);
    &lines[start..]
}

/// A line consisting of `marker` alone, optionally after a segment glyph.
fn is_bare(line: &str, marker: &str) -> bool {
    let t = line.trim();
    let t = t.strip_prefix(SEGMENT_MARKER).map(str::trim).unwrap_or(t);
    t == marker
}

fn is_hint(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("enter to select")
        || lower.contains("esc to cancel")
        || lower.contains("to navigate")
}

fn is_free_text_option(text: &str) -> bool {
    let t = text.trim().trim_end_matches('.').to_ascii_lowercase();
    t == "type something" || t == "chat about this" || t.starts_with("type something")
}

/// The line without surrounding whitespace and box-drawing side borders.
fn unbox(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['│', '┃'])
        .trim_end_matches(['│', '┃'])
        .trim()
}

/// `None` for blank lines, rules, hints and other chrome.
fn question_candidate(line: &str) -> Option<String> {
    let t = unbox(line);
    if t.is_empty() || is_hint(t) {
        return None;
    }
    if t.chars()
        .all(|c| matches!(c, '─' | '━' | '═' | '-' | '╭' | '╮' | '╰' | '╯' | '┌' | '┐' | '└' | '┘' | ' '))
    {
        return None;
    }
    // Tab headers of multi-question dialogs: `☐ Fruit  ✔ Submit  →`.
    if t.starts_with(['☐', '☒', '✔', '←', '→']) {
        return None;
    }
    Some(t.to_string())
}

fn parse_tagged_block<S: AsRef<str>>(segment: &[S]) -> Option<(usize, Prompt)> {
    let start = segment.iter().rposition(|l| is_bare(l.as_ref(), ASK_START))?;
    let mut prompt = Prompt::default();
    let mut closed = false;

    for line in &segment[start + 1..] {
        let line = line.as_ref().trim();
        if is_bare(line, ASK_END) {
            closed = true;
            break;
        }
        if let Some(q) = line.strip_prefix("question:") {
            prompt.question = q.trim().to_string();
        } else if let Some(o) = line.strip_prefix("option:") {
            let o = o.trim();
            if !o.is_empty() {
                prompt.options.push(o.to_string());
            }
        }
    }

    // An unterminated block is still being printed.
    (closed && !prompt.question.is_empty()).then_some((start, prompt))
}

fn parse_selection_ui<S: AsRef<str>>(segment: &[S]) -> Option<(usize, Prompt)> {
    let hint = segment.iter().rposition(|l| is_hint(l.as_ref()))?;
    let floor = hint.saturating_sub(OPTION_LOOKBACK);

    // Walk up from the footer collecting option lines until option 1.
    let mut found: Vec<(usize, u32, String)> = Vec::new();
    let mut first = None;
    for i in (floor..hint).rev() {
        let Some(caps) = OPTION_RE.captures(unbox(segment[i].as_ref())) else {
            continue;
        };
        let n: u32 = caps[1].parse().ok()?;
        found.push((i, n, caps[2].trim().to_string()));
        if n == 1 {
            first = Some(i);
            break;
        }
    }
    let first = first?;
    found.reverse();
    if found.iter().enumerate().any(|(k, (_, n, _))| *n as usize != k + 1) {
        return None;
    }

    let options: Vec<String> = found
        .into_iter()
        .map(|(_, _, text)| text)
        .filter(|text| !is_free_text_option(text))
        .collect();
    if options.is_empty() {
        return None;
    }

    let question = segment[first.saturating_sub(QUESTION_LOOKBACK)..first]
        .iter()
        .rev()
        .find_map(|l| question_candidate(l.as_ref()))
        .unwrap_or_default();

    Some((hint, Prompt { question, options }))
}

/// Latest wait signal in the segment, with the line it was found on.
fn wait_signal<S: AsRef<str>>(segment: &[S]) -> Option<(usize, WaitDetection)> {
    if let Some((at, prompt)) = parse_tagged_block(segment) {
        return Some((at, WaitDetection::found(WaitReason::PromptBlock, Some(prompt))));
    }
    if let Some((at, prompt)) = parse_selection_ui(segment) {
        return Some((
            at,
            WaitDetection::found(WaitReason::AskUserQuestionUI, Some(prompt)),
        ));
    }
    segment
        .iter()
        .rposition(|l| is_bare(l.as_ref(), WAITING_MARKER))
        .map(|at| (at, WaitDetection::found(WaitReason::Marker, None)))
}

fn done_signal<S: AsRef<str>>(segment: &[S]) -> Option<usize> {
    segment.iter().rposition(|l| is_bare(l.as_ref(), DONE_MARKER))
}

/// Whether the worker is blocked on the user, and on what.
///
/// A `PAW_DONE` printed after the wait signal wins over it.
pub fn detect_wait<S: AsRef<str>>(lines: &[S]) -> WaitDetection {
    let segment = latest_segment(lines);
    match (wait_signal(segment), done_signal(segment)) {
        (Some((w, _)), Some(d)) if d > w => WaitDetection::idle(),
        (Some((_, detection)), _) => detection,
        (None, _) => WaitDetection::idle(),
    }
}

/// Whether the most recent segment ends the task.
pub fn detect_done<S: AsRef<str>>(lines: &[S]) -> bool {
    let segment = latest_segment(lines);
    match (done_signal(segment), wait_signal(segment)) {
        (Some(d), Some((w, _))) => d > w,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
