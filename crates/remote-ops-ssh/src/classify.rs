//! Heuristic for commands that run until interrupted.
//!
//! Used when the planner does not mark a request as streaming. A false
//! positive only costs a cancel prompt; a false negative makes a one-shot
//! execution sit until its timeout.

use std::sync::LazyLock;

use regex::Regex;

static FOLLOW_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|\s)(-[A-Za-z]*[fF][A-Za-z]*|--follow(=\S+)?)(\s|$)").expect("valid regex")
});

static DMESG_FOLLOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)(-[A-Za-z]*w[A-Za-z]*|--follow)(\s|$)").expect("valid regex"));

static NUMERIC_ARG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid regex"));

/// Programs that never exit on their own.
const ALWAYS_STREAMING: &[&str] = &["watch", "less", "more", "most", "tshark", "mtr", "nethogs", "iftop"];

/// `sudo` options whose value is the following word.
const SUDO_VALUE_OPTIONS: &[&str] = &["-u", "-g", "-p", "-C", "-D", "-U", "--user", "--group", "--prompt"];

/// Resolve the streaming flag of a request: explicit wins, otherwise guess.
#[must_use]
pub fn resolve_streaming(explicit: bool, command: &str) -> bool {
    explicit || looks_streaming(command)
}

/// Guess whether `command` streams output until cancelled.
#[must_use]
pub fn looks_streaming(command: &str) -> bool {
    command
        .split(['|', ';', '&'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .any(segment_streams)
}

fn segment_streams(segment: &str) -> bool {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let mut words = words.as_slice();
    while let [first, rest @ ..] = words {
        words = match (*first, rest) {
            (opt, [_, rest @ ..]) if SUDO_VALUE_OPTIONS.contains(&opt) => rest,
            (word, _) if word == "sudo" || word.starts_with('-') || word.contains('=') => rest,
            _ => break,
        };
    }
    let [program, args @ ..] = words else {
        return false;
    };
    let program = program.rsplit('/').next().unwrap_or(program);
    let tail = args.join(" ");

    match program {
        "tail" | "journalctl" => FOLLOW_FLAG.is_match(&tail),
        "dmesg" => DMESG_FOLLOW.is_match(&tail),
        "top" | "htop" | "atop" | "btop" | "iotop" => !has_flag(args, 'n') && !has_flag(args, 'b'),
        "ping" | "ping6" => !has_flag(args, 'c') && !has_flag(args, 'w'),
        "tcpdump" => !has_flag(args, 'c'),
        "docker" | "podman" | "kubectl" => match args.first() {
            Some(&"attach") => true,
            Some(&"logs") => sub_follows(args),
            _ => false,
        },
        // An interval without a count repeats forever.
        "vmstat" | "iostat" | "mpstat" | "sar" => {
            args.iter().filter(|a| NUMERIC_ARG.is_match(a)).count() == 1
        }
        _ => ALWAYS_STREAMING.contains(&program),
    }
}

/// True if a short-option cluster in `args` contains `flag`.
fn has_flag(args: &[&str], flag: char) -> bool {
    args.iter()
        .any(|a| a.starts_with('-') && !a.starts_with("--") && a[1..].contains(flag))
}

fn sub_follows(args: &[&str]) -> bool {
    args.iter()
        .any(|a| *a == "--follow" || (a.starts_with('-') && !a.starts_with("--") && a.contains('f')))
}
