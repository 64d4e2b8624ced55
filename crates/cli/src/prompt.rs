use std::io::{self, BufRead, IsTerminal, Write};

use pg_backup_engine::Confirm;

/// Yes/no questions on the terminal. Without a terminal on stdin every
/// question is answered "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if !io::stdin().is_terminal() {
            tracing::warn!(%prompt, "stdin is not a terminal, answering no");
            return false;
        }
        ask(prompt)
            .map(|answer| is_yes(&answer))
            .unwrap_or(false)
    }
}

fn ask(prompt: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt} [y/N] ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Reads a 1-based choice out of `count` options; `None` on an empty answer,
/// a non-terminal stdin or anything out of range.
pub fn choose(prompt: &str, count: usize) -> Option<usize> {
    if count == 0 || !io::stdin().is_terminal() {
        return None;
    }
    let mut stdout = io::stdout();
    write!(stdout, "{prompt} [1-{count}] ").ok()?;
    stdout.flush().ok()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    parse_choice(&line, count)
}

pub fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let n: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}
