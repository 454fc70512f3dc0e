//! Signal Analyzer — heuristic prompt scan
//!
//! Turns a prompt plus a small amount of host context into a set of
//! [`EscalationSignal`]s. Purely lexical: keyword sets, a handful of
//! regexes and word counts. No model calls, no I/O.
//!
//! ```text
//! prompt + AnalysisContext → SignalAnalyzer::analyze → SignalSet → StageAdvisor
//! ```

use crate::escalation::config::EscalationConfig;
use crate::signals::types::{EscalationSignal, SignalSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Words that push a prompt toward "complex".
const COMPLEX_KEYWORDS: &[&str] = &[
    "implement",
    "refactor",
    "architecture",
    "design",
    "migrate",
    "integrate",
    "optimize",
    "debug",
    "investigate",
    "restructure",
    "rewrite",
    "overhaul",
    "analyze",
    "comprehensive",
    "multiple",
    "across",
    "system",
    "concurrency",
    "performance",
    "security",
];

/// Words typical of a quick question.
const SIMPLE_KEYWORDS: &[&str] = &[
    "what", "who", "when", "where", "which", "why", "how", "explain", "define", "meaning",
    "is", "are", "does", "can",
];

const EDIT_KEYWORDS: &[&str] = &[
    "edit", "modify", "change", "update", "fix", "add", "remove", "delete", "replace",
    "insert", "write", "create", "patch",
];

const TEST_KEYWORDS: &[&str] = &[
    "test", "tests", "testing", "pytest", "unittest", "coverage", "assert", "spec", "verify",
];

const BUILD_KEYWORDS: &[&str] = &[
    "build", "compile", "cargo", "make", "npm", "install", "deploy", "package", "bundle",
    "link",
];

const REFACTOR_KEYWORDS: &[&str] = &[
    "refactor", "restructure", "reorganize", "extract", "rename", "cleanup", "simplify",
    "decouple", "modularize",
];

/// Verbs counted toward the "more than two distinct actions" rule.
const ACTION_VERBS: &[&str] = &[
    "add", "build", "change", "check", "create", "delete", "deploy", "document", "edit",
    "find", "fix", "implement", "install", "migrate", "modify", "move", "read", "refactor",
    "remove", "rename", "replace", "run", "test", "update", "write",
];

/// Phrases that mark sequential work.
const SEQUENCE_PHRASES: &[&str] = &[
    "first",
    "then",
    "after that",
    "afterwards",
    "next",
    "finally",
    "step 1",
    "followed by",
    "once that",
    "and then",
];

/// Short replies that only acknowledge the previous turn.
const ACKNOWLEDGMENT_PHRASES: &[&str] = &[
    "thanks",
    "thank you",
    "ok",
    "okay",
    "got it",
    "sounds good",
    "great",
    "perfect",
    "cool",
    "understood",
];

const CLARIFICATION_PHRASES: &[&str] = &[
    "what do you mean",
    "clarify",
    "can you explain",
    "could you explain",
    "i don't understand",
    "i do not understand",
    "what does that mean",
    "elaborate",
];

/// Word-count ceiling for the simple-question and acknowledgment rules.
const SIMPLE_QUESTION_MAX_WORDS: usize = 30;
const ACKNOWLEDGMENT_MAX_WORDS: usize = 6;

/// Path-like tokens: `src/main.rs`, `./foo/bar`, `config.toml`.
static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s`'(\[])((?:\.{1,2}/|/|~/)?(?:[\w.-]+/)*[\w-]+\.(?:rs|py|js|ts|tsx|jsx|go|java|c|h|cpp|hpp|toml|yaml|yml|json|md|txt|sh|sql|html|css|lock|cfg|ini))\b",
    )
    .expect("FILE_PATH_RE regex should compile")
});

/// Directory-style references: `src/`, `./scripts/deploy`.
static DIR_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:\./|\.\./|~/)[\w./-]+|(?:^|\s)[\w-]+/[\w./-]+")
        .expect("DIR_PATH_RE regex should compile")
});

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("FENCED_CODE_RE regex should compile"));

static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]+`").expect("INLINE_CODE_RE regex should compile"));

/// Numbered or bulleted list lines (`1. foo`, `2) bar`).
static NUMBERED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("NUMBERED_LINE_RE regex should compile")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9_']+").expect("WORD_RE regex should compile"));

/// Host context that accompanies a prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisContext {
    /// The working directory is a git repository
    pub is_git_repo: bool,
    /// Workspace root, when the host has one
    pub workspace: Option<String>,
    /// A tool call failed on the previous attempt
    pub previous_tool_failed: bool,
    /// The previous result was ambiguous
    pub ambiguous_result: bool,
    /// The previous attempt left the task unfinished
    pub incomplete_task: bool,
}

impl AnalysisContext {
    /// Context for a prompt issued inside a repository workspace
    pub fn repo(workspace: impl Into<String>) -> Self {
        Self {
            is_git_repo: true,
            workspace: Some(workspace.into()),
            ..Default::default()
        }
    }
}

/// Deterministic, side-effect-free prompt analyzer.
#[derive(Debug, Clone)]
pub struct SignalAnalyzer {
    long_prompt_threshold: usize,
    complex_keyword_threshold: usize,
}

impl Default for SignalAnalyzer {
    fn default() -> Self {
        Self::new(&EscalationConfig::default())
    }
}

impl SignalAnalyzer {
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            long_prompt_threshold: config.long_prompt_threshold,
            complex_keyword_threshold: config.complex_keyword_threshold,
        }
    }

    /// Scan a prompt and its context for escalation signals.
    pub fn analyze(&self, prompt: &str, context: &AnalysisContext) -> SignalSet {
        let mut signals = SignalSet::new();
        let lower = prompt.to_lowercase();
        let words: Vec<&str> = WORD_RE.find_iter(&lower).map(|m| m.as_str()).collect();
        let word_set: HashSet<&str> = words.iter().copied().collect();
        let word_count = prompt.split_whitespace().count();

        // Complexity
        if word_count > self.long_prompt_threshold {
            signals.insert(EscalationSignal::LongPrompt);
        }
        let complex_hits = count_matches(COMPLEX_KEYWORDS, &word_set, &lower);
        if complex_hits >= self.complex_keyword_threshold {
            signals.insert(EscalationSignal::ComplexKeywords);
        }
        if is_multi_step(prompt, &lower, &word_set) {
            signals.insert(EscalationSignal::MultiStepIntent);
        }

        // Context
        if FILE_PATH_RE.is_match(prompt) || DIR_PATH_RE.is_match(prompt) {
            signals.insert(EscalationSignal::FileReferences);
        }
        if FENCED_CODE_RE.is_match(prompt) || INLINE_CODE_RE.is_match(prompt) {
            signals.insert(EscalationSignal::CodeBlocks);
        }
        if context.is_git_repo || context.workspace.is_some() {
            signals.insert(EscalationSignal::RepoContext);
        }

        // Task intent
        if contains_any(EDIT_KEYWORDS, &word_set, &lower) {
            signals.insert(EscalationSignal::EditIntent);
        }
        if contains_any(TEST_KEYWORDS, &word_set, &lower) {
            signals.insert(EscalationSignal::TestIntent);
        }
        if contains_any(BUILD_KEYWORDS, &word_set, &lower) {
            signals.insert(EscalationSignal::BuildIntent);
        }
        if contains_any(REFACTOR_KEYWORDS, &word_set, &lower) {
            signals.insert(EscalationSignal::RefactorIntent);
        }

        // De-escalation
        if complex_hits == 0
            && word_count < SIMPLE_QUESTION_MAX_WORDS
            && contains_any(SIMPLE_KEYWORDS, &word_set, &lower)
        {
            signals.insert(EscalationSignal::SimpleQuestion);
        }
        if word_count <= ACKNOWLEDGMENT_MAX_WORDS
            && contains_any(ACKNOWLEDGMENT_PHRASES, &word_set, &lower)
        {
            signals.insert(EscalationSignal::Acknowledgment);
        }
        if contains_any(CLARIFICATION_PHRASES, &word_set, &lower) {
            signals.insert(EscalationSignal::Clarification);
        }

        // Outcome of the previous attempt
        if context.previous_tool_failed {
            signals.insert(EscalationSignal::ToolFailure);
        }
        if context.ambiguous_result {
            signals.insert(EscalationSignal::AmbiguousResult);
        }
        if context.incomplete_task {
            signals.insert(EscalationSignal::IncompleteTask);
        }

        signals
    }
}

/// Whole-word match for single words, substring match for phrases.
fn keyword_matches(keyword: &str, words: &HashSet<&str>, lower: &str) -> bool {
    if keyword.contains(' ') {
        lower.contains(keyword)
    } else {
        words.contains(keyword)
    }
}

fn count_matches(keywords: &[&str], words: &HashSet<&str>, lower: &str) -> usize {
    keywords
        .iter()
        .filter(|kw| keyword_matches(kw, words, lower))
        .count()
}

fn contains_any(keywords: &[&str], words: &HashSet<&str>, lower: &str) -> bool {
    keywords.iter().any(|kw| keyword_matches(kw, words, lower))
}

fn is_multi_step(prompt: &str, lower: &str, words: &HashSet<&str>) -> bool {
    if prompt.matches('?').count() > 1 {
        return true;
    }
    if contains_any(SEQUENCE_PHRASES, words, lower) {
        return true;
    }
    if NUMBERED_LINE_RE.find_iter(prompt).count() >= 2 {
        return true;
    }
    count_matches(ACTION_VERBS, words, lower) > 2
}
