// ABOUTME: Pattern tables classifying command output lines and command kinds
// ABOUTME: Ordered, data-driven so new command profiles are additive

use once_cell::sync::Lazy;
use regex::Regex;

/// Terminal control sequences: CSI (including SGR color codes), OSC titles,
/// and bare two-byte escapes.
pub static ANSI_ESCAPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]").unwrap()
});

pub static DIGIT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Lines matching any of these always survive the noise filter, whatever
/// else they look like.
pub static KEEP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)error",
        r"(?i)\bwarn",
        r"ERR!",
        r"(?i)failed",
        r"(?i)deprecated",
        r"(?i)vulnerab",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Low-value output: progress-bar renders, spinner frames, percentage
/// tickers, and package-manager network/timing traces.
pub static DROP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // [====>    ] 42% style bars, with or without a leading label
        r"\[[=\-#> .]{3,}\]\s*\d{1,3}\s*%",
        // bare percentage tickers ("  73%", "73% building modules")
        r"^\s*\d{1,3}\s*%",
        // unicode block / braille progress renders
        r"^[\s░▒▓█⣿]*[░▒▓█]{2,}",
        r"[⠁⠂⠄⡀⢀⠠⠐⠈⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
        // npm/pnpm network and timing trace lines
        r"^npm\s+(http|timing|sill|verb)\b",
        r"^Progress: resolved \d+",
        r"^\s*(Receiving|Resolving|Counting|Compressing) objects:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn is_noise(line: &str) -> bool {
    if KEEP_PATTERNS.iter().any(|re| re.is_match(line)) {
        return false;
    }
    DROP_PATTERNS.iter().any(|re| re.is_match(line))
}

/// Command classification driving the stage-3 summarization profile.
/// Unrecognized commands deliberately pass through unchanged; new profiles
/// are rows here, not new control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Install,
    Build,
    Other,
}

static INSTALL_COMMANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|&&\s*)(npm|pnpm|yarn|bun)\s+(install|ci|add|i)\b|(?:^|&&\s*)pip3?\s+install\b")
        .unwrap()
});

static BUILD_COMMANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|&&\s*)(npm|pnpm|yarn|bun)\s+(run\s+)?build\b|\b(vite|next|tsc|webpack|rollup|esbuild)\s+build\b",
    )
    .unwrap()
});

impl CommandKind {
    pub fn classify(command: &str) -> Self {
        let command = command.trim();
        if INSTALL_COMMANDS.is_match(command) {
            CommandKind::Install
        } else if BUILD_COMMANDS.is_match(command) {
            CommandKind::Build
        } else {
            CommandKind::Other
        }
    }
}

/// Install profile: package-count summary, audit/vulnerability summary,
/// warnings/deprecations, errors.
pub static INSTALL_KEEP: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(added|removed|changed|audited)\s+\d+\s+packages?",
        r"^up to date",
        r"(?i)vulnerab",
        r"(?i)\bfound\s+\d+",
        r"(?i)\baudit\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Build profile: bundle/chunk sizes and completion/timing summaries.
/// Warnings and errors ride on KEEP_PATTERNS.
pub static BUILD_KEEP: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d+(\.\d+)?\s*(B|kB|KB|KiB|MB|MiB)\b",
        r"(?i)(built in|done in|build completed|compiled|bundle|chunk)",
        r"✓|✔",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn profile_keeps(kind: CommandKind, line: &str) -> bool {
    if KEEP_PATTERNS.iter().any(|re| re.is_match(line)) {
        return true;
    }
    let table = match kind {
        CommandKind::Install => &INSTALL_KEEP,
        CommandKind::Build => &BUILD_KEEP,
        CommandKind::Other => return true,
    };
    table.iter().any(|re| re.is_match(line))
}
