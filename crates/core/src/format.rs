//! Commit message templates.
//!
//! A template is plain text with `%` tokens substituted per commit:
//!
//! | token   | expands to                         |
//! |---------|------------------------------------|
//! | `%a`    | author name                        |
//! | `%b`    | branch                             |
//! | `%c`    | short commit id                    |
//! | `%C`    | full commit id                     |
//! | `%e`    | author email                       |
//! | `%m`    | first line of the commit message   |
//! | `%n`    | repository name                    |
//! | `%u`    | repository url                     |
//! | `%S`    | a single space                     |
//! | `%r`    | reset all styles                   |
//! | `%!`    | toggle bold                        |
//! | `%(NN)` | color code `NN`                    |
//! | `%%`    | a literal `%`                      |
//!
//! Any other character after `%` is emitted as-is. Each template line
//! becomes one output line.

use crate::domain::commit::Commit;

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const RESET: char = '\x0f';

/// Repository-level values available to a template
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub repo_name: &'a str,
    pub repo_url: &'a str,
    pub branch: &'a str,
}

enum Mode {
    Normal,
    Subst,
    Color(String),
}

/// Render `template` for one commit, one entry per template line
pub fn format_commit(template: &str, commit: &Commit, ctx: &TemplateContext<'_>) -> Vec<String> {
    template
        .split('\n')
        .map(|line| format_line(line, commit, ctx))
        .collect()
}

fn format_line(line: &str, commit: &Commit, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut mode = Mode::Normal;

    for c in line.chars() {
        mode = match mode {
            Mode::Normal if c == '%' => Mode::Subst,
            Mode::Normal => {
                out.push(c);
                Mode::Normal
            }
            Mode::Subst if c == '(' => Mode::Color(String::new()),
            Mode::Subst => {
                push_token(&mut out, c, commit, ctx);
                Mode::Normal
            }
            Mode::Color(code) if c == ')' => {
                out.push(COLOR);
                out.push_str(&code);
                Mode::Normal
            }
            Mode::Color(mut code) => {
                code.push(c);
                Mode::Color(code)
            }
        };
    }

    out
}

fn push_token(out: &mut String, token: char, commit: &Commit, ctx: &TemplateContext<'_>) {
    match token {
        'a' => out.push_str(&commit.author.name),
        'b' => out.push_str(ctx.branch),
        'c' => out.push_str(commit.short_id()),
        'C' => out.push_str(&commit.id),
        'e' => out.push_str(&commit.author.email),
        'm' => out.push_str(commit.summary()),
        'n' => out.push_str(ctx.repo_name),
        'u' => out.push_str(ctx.repo_url),
        'S' => out.push(' '),
        'r' => out.push(RESET),
        '!' => out.push(BOLD),
        other => out.push(other),
    }
}
