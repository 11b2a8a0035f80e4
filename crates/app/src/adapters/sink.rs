use gitwatch_core::format::{BOLD, COLOR, RESET};
use gitwatch_core::ports::{DeliveryError, OutputSink};
use std::io::{self, Write};

/// Output sink that writes `[target] line` to stdout.
///
/// Chat style control codes are stripped unless `keep_styles` is set.
#[derive(Debug, Default)]
pub struct StdoutSink {
    keep_styles: bool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_styles(keep_styles: bool) -> Self {
        Self { keep_styles }
    }
}

impl OutputSink for StdoutSink {
    fn send(&self, target: &str, line: &str) -> Result<(), DeliveryError> {
        let text = if self.keep_styles {
            line.to_string()
        } else {
            strip_styles(line)
        };

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "[{}] {}", target, text).map_err(|e| DeliveryError::new(e.to_string()))
    }
}

/// Remove bold/reset codes and color codes with their digits
pub fn strip_styles(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            BOLD | RESET => {}
            COLOR => {
                // foreground and optional ",background", two digits each
                for _ in 0..2 {
                    chars.next_if(|d| d.is_ascii_digit());
                }
                if chars.peek() == Some(&',') {
                    chars.next();
                    for _ in 0..2 {
                        chars.next_if(|d| d.is_ascii_digit());
                    }
                }
            }
            other => out.push(other),
        }
    }

    out
}
