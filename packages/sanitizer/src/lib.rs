// ABOUTME: Reduces raw command output to a bounded, high-signal report
// ABOUTME: Fixed pipeline: strip, denoise, summarize, collapse, truncate, assemble

use serde::{Deserialize, Serialize};

pub mod patterns;

use patterns::{is_noise, profile_keeps, CommandKind, ANSI_ESCAPES, DIGIT_RUNS};

/// Character budget for the stdout section of a report.
pub const STDOUT_BUDGET: usize = 20_000;
/// Character budget for the stderr section of a report.
pub const STDERR_BUDGET: usize = 10_000;

/// Bounded, noise-reduced view of one command invocation, suitable as a
/// tool result for a token-limited agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedReport {
    pub exit_code: i64,
    pub stdout_summary: Option<String>,
    pub stderr_summary: Option<String>,
}

impl SanitizedReport {
    pub fn render(&self) -> String {
        let mut out = format!("Exit Code: {}", self.exit_code);
        if let Some(stdout) = &self.stdout_summary {
            out.push_str("\n\nSTDOUT:\n");
            out.push_str(stdout);
        }
        if let Some(stderr) = &self.stderr_summary {
            out.push_str("\n\nSTDERR:\n");
            out.push_str(stderr);
        }
        out
    }
}

/// Build a report from raw command output. Pure and total: no stage may
/// fail, whatever bytes the command produced.
pub fn sanitize(command: &str, stdout: &str, stderr: &str, exit_code: i64) -> SanitizedReport {
    let stdout = process_stream(command, stdout, exit_code, STDOUT_BUDGET);
    let stderr = process_stream(command, stderr, exit_code, STDERR_BUDGET);

    SanitizedReport {
        exit_code,
        stdout_summary: (!stdout.is_empty()).then_some(stdout),
        stderr_summary: (!stderr.is_empty()).then_some(stderr),
    }
}

fn process_stream(command: &str, raw: &str, exit_code: i64, budget: usize) -> String {
    let stripped = strip_control_sequences(raw);
    let denoised = drop_noise_lines(&stripped);
    let summarized = summarize_for_command(command, &denoised, exit_code);
    let collapsed = collapse_repeats(&summarized);
    truncate_middle(&collapsed, budget)
}

/// Stage 1: remove SGR/CSI/OSC escape sequences and carriage returns.
pub fn strip_control_sequences(text: &str) -> String {
    ANSI_ESCAPES.replace_all(text, "").replace('\r', "")
}

/// Stage 2: drop progress/spinner/network-trace lines, except lines that
/// also match a high-value keep pattern.
pub fn drop_noise_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !is_noise(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage 3: command-profile summarization. Skipped entirely on non-zero
/// exit so the agent sees the unabridged failure text.
pub fn summarize_for_command(command: &str, text: &str, exit_code: i64) -> String {
    if exit_code != 0 {
        return text.to_string();
    }

    let kind = CommandKind::classify(command);
    if kind == CommandKind::Other {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();

    // The final status of a build often sits in its closing lines even when
    // no pattern matches them.
    let tail_indices: Vec<usize> = if kind == CommandKind::Build {
        lines
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, l)| !l.trim().is_empty())
            .take(3)
            .map(|(i, _)| i)
            .collect()
    } else {
        Vec::new()
    };

    lines
        .iter()
        .enumerate()
        .filter(|(i, line)| profile_keeps(kind, line) || tail_indices.contains(i))
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage 4: collapse runs of lines that are identical after digit
/// normalization, keeping the first occurrence verbatim.
pub fn collapse_repeats(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut prev_norm: Option<String> = None;
    let mut repeats = 0usize;

    for line in text.lines() {
        let norm = DIGIT_RUNS.replace_all(line, "#").into_owned();
        if prev_norm.as_deref() == Some(norm.as_str()) {
            repeats += 1;
        } else {
            if repeats > 0 {
                out.push(format!("... (repeated {} more times)", repeats));
            }
            out.push(line.to_string());
            prev_norm = Some(norm);
            repeats = 0;
        }
    }
    if repeats > 0 {
        out.push(format!("... (repeated {} more times)", repeats));
    }

    out.join("\n")
}

/// Stage 5: keep the head (60% of budget) and tail (40%) of oversized
/// output, biasing toward the tail where final error/status lines cluster.
pub fn truncate_middle(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }

    let head_len = floor_char_boundary(text, budget * 6 / 10);
    let tail_len = budget - head_len;
    let tail_start = ceil_char_boundary(text, text.len() - tail_len);

    let head = &text[..head_len];
    let tail = &text[tail_start..];
    let elided = text.len() - head.len() - tail.len();

    format!("{}\n... [{} characters elided] ...\n{}", head, elided, tail)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_clean_output_round_trips() {
        let stdout = "total 16\nsrc\nCargo.toml";
        let report = sanitize("ls -la", stdout, "", 0);

        assert_eq!(
            report.render(),
            format!("Exit Code: 0\n\nSTDOUT:\n{}", stdout)
        );
        assert!(report.stderr_summary.is_none());
    }

    #[test]
    fn stderr_section_appears_when_nonempty() {
        let report = sanitize("node server.js", "listening", "boom", 1);
        assert_eq!(
            report.render(),
            "Exit Code: 1\n\nSTDOUT:\nlistening\n\nSTDERR:\nboom"
        );
    }

    #[test]
    fn ansi_and_carriage_returns_are_stripped() {
        let colored = "\x1b[32m✓ done\x1b[0m\r";
        assert_eq!(strip_control_sequences(colored), "✓ done");

        let osc = "\x1b]0;title\x07plain";
        assert_eq!(strip_control_sequences(osc), "plain");
    }

    #[test]
    fn failure_disables_summarization_and_keeps_context() {
        let stdout = [
            "transforming modules",
            "[=====>        ] 40% reify",
            "ERROR: build exploded",
            "    at src/index.ts:10:3",
        ]
        .join("\n");

        let report = sanitize("npm run build", &stdout, "", 1);
        let rendered = report.render();

        // Stage 3 skipped: unmatched context lines survive verbatim
        assert!(rendered.contains("transforming modules"));
        assert!(rendered.contains("ERROR: build exploded"));
        assert!(rendered.contains("    at src/index.ts:10:3"));
        // Stage 2 still applies to pure progress noise
        assert!(!rendered.contains("40% reify"));
    }

    #[test]
    fn install_success_keeps_only_summary_lines() {
        let stdout = [
            "npm timing idealTree Completed in 501ms",
            "added 1337 packages in 12s",
            "npm WARN deprecated left-pad@1.0.0",
            "found 2 moderate severity vulnerabilities",
            "some irrelevant chatter",
        ]
        .join("\n");

        let report = sanitize("npm install", &stdout, "", 0);
        let rendered = report.render();

        assert!(rendered.contains("added 1337 packages in 12s"));
        assert!(rendered.contains("npm WARN deprecated left-pad@1.0.0"));
        assert!(rendered.contains("found 2 moderate severity vulnerabilities"));
        assert!(!rendered.contains("some irrelevant chatter"));
        assert!(!rendered.contains("npm timing"));
    }

    #[test]
    fn build_success_keeps_sizes_and_final_lines() {
        let stdout = [
            "vite v5.0.0 building for production...",
            "shuffling some internals",
            "dist/index.html   0.46 kB",
            "dist/assets/index-abc123.js   142.33 kB",
            "",
            "mystery closing line",
            "another closing line",
        ]
        .join("\n");

        let report = sanitize("npm run build", &stdout, "", 0);
        let rendered = report.render();

        assert!(rendered.contains("dist/index.html   0.46 kB"));
        assert!(rendered.contains("dist/assets/index-abc123.js   142.33 kB"));
        // Last three non-empty lines survive even unmatched
        assert!(rendered.contains("mystery closing line"));
        assert!(rendered.contains("another closing line"));
        assert!(!rendered.contains("shuffling some internals"));
    }

    #[test]
    fn repeated_lines_collapse_after_digit_normalization() {
        let input = (1..=5)
            .map(|i| format!("compiling module {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let collapsed = collapse_repeats(&input);
        assert_eq!(
            collapsed,
            "compiling module 1\n... (repeated 4 more times)"
        );
    }

    #[test]
    fn distinct_lines_do_not_collapse() {
        let input = "alpha\nbeta\ngamma";
        assert_eq!(collapse_repeats(input), input);
    }

    #[test]
    fn truncation_keeps_head_and_tail_within_budget() {
        let head_marker = "HEAD-OF-OUTPUT";
        let tail_marker = "TAIL-OF-OUTPUT";
        let middle = "x".repeat(30_000);
        let input = format!("{}{}{}", head_marker, middle, tail_marker);

        let out = truncate_middle(&input, STDOUT_BUDGET);

        let marker_len = out.len() - STDOUT_BUDGET;
        assert!(out.len() <= STDOUT_BUDGET + marker_len);
        assert!(out.contains(head_marker));
        assert!(out.contains(tail_marker));
        assert!(out.contains("characters elided"));
    }

    #[test]
    fn truncation_is_noop_under_budget() {
        let input = "short output";
        assert_eq!(truncate_middle(input, STDOUT_BUDGET), input);
    }

    #[test]
    fn collapse_runs_before_truncation() {
        // A repeated-line storm far over budget collapses to two lines, so
        // nothing is truncated and the marker reports the real repeat count.
        let storm = (0..2_000)
            .map(|i| format!("polling attempt {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let report = sanitize("node poll.js", &storm, "", 0);
        let rendered = report.render();

        assert!(rendered.contains("polling attempt 0"));
        assert!(rendered.contains("... (repeated 1999 more times)"));
        assert!(!rendered.contains("characters elided"));
    }
}
