//! One-time opt-in decision.
//!
//! The prompt here is the only place the telemetry client blocks on the user.
//! It runs at most once per installation: after an answer is recorded in the
//! settings it is never shown again.

use super::settings::TelemetrySettings;
use crate::error::TelemetryError;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{BufRead, IsTerminal, Write};

/// Blocking yes/no question.
pub trait Prompter {
    fn ask_yes_no(&mut self, message: &str) -> Result<bool, TelemetryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentOutcome {
    pub opted_in: bool,
    /// The user was asked during this call and said no.
    pub newly_declined: bool,
}

pub fn opt_in_message(app_name: &str) -> String {
    format!(
        "Would you like to help improve {} by sending anonymous usage data? \
Collected data never includes your source code, and identifying values are \
hashed before they leave this machine. [y/n]: ",
        app_name
    )
}

/// Return the persisted decision, or ask once and record the answer in
/// `settings`. The caller owns writing `settings` back to disk.
pub fn resolve_opt_in(
    settings: &mut TelemetrySettings,
    app_name: &str,
    prompter: &mut dyn Prompter,
) -> Result<ConsentOutcome, TelemetryError> {
    if let Some(opted_in) = settings.opt_in {
        return Ok(ConsentOutcome {
            opted_in,
            newly_declined: false,
        });
    }

    let opted_in = prompter.ask_yes_no(&opt_in_message(app_name))?;
    tracing::debug!("telemetry opt-in answered: {}", opted_in);
    settings.opt_in = Some(opted_in);

    Ok(ConsentOutcome {
        opted_in,
        newly_declined: !opted_in,
    })
}

/// Asks on the controlling terminal. A single `y` or `n` keypress answers
/// when stdin is a TTY; otherwise a `yes`/`no` line is read from stdin.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn ask_yes_no(&mut self, message: &str) -> Result<bool, TelemetryError> {
        let stdin = std::io::stdin();
        if stdin.is_terminal() {
            ask_key_strict(message)
        } else {
            ask_line(&mut stdin.lock(), &mut std::io::stderr(), message)
        }
    }
}

/// Line-oriented prompter over arbitrary reader/writer pairs.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask_yes_no(&mut self, message: &str) -> Result<bool, TelemetryError> {
        ask_line(&mut self.input, &mut self.output, message)
    }
}

fn ask_key_strict(message: &str) -> Result<bool, TelemetryError> {
    let mut out = std::io::stderr();
    write!(out, "{}", message)?;
    out.flush()?;

    terminal::enable_raw_mode()?;
    let answer = read_yes_no_key();
    let _ = terminal::disable_raw_mode();
    let answer = answer?;

    writeln!(out, "{}", if answer { "y" } else { "n" })?;
    Ok(answer)
}

fn read_yes_no_key() -> Result<bool, TelemetryError> {
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }
        match code {
            KeyCode::Char('y') | KeyCode::Char('Y') => return Ok(true),
            KeyCode::Char('n') | KeyCode::Char('N') => return Ok(false),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(TelemetryError::PromptError(
                    "opt-in prompt interrupted".to_string(),
                ));
            }
            _ => {}
        }
    }
}

fn ask_line<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
) -> Result<bool, TelemetryError> {
    loop {
        write!(output, "{}", message)?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(TelemetryError::PromptError(
                "input closed before the opt-in question was answered".to_string(),
            ));
        }
        if let Some(answer) = parse_yes_no(&line) {
            return Ok(answer);
        }
    }
}

pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct PanicPrompter;

    impl Prompter for PanicPrompter {
        fn ask_yes_no(&mut self, _message: &str) -> Result<bool, TelemetryError> {
            panic!("consent must not be asked twice");
        }
    }

    #[test]
    fn test_persisted_decision_is_never_reprompted() {
        for persisted in [true, false] {
            let mut settings = TelemetrySettings {
                opt_in: Some(persisted),
                ..Default::default()
            };
            let outcome = resolve_opt_in(&mut settings, "taco", &mut PanicPrompter).unwrap();
            assert_eq!(outcome.opted_in, persisted);
            assert!(!outcome.newly_declined);
            assert_eq!(settings.opt_in, Some(persisted));
        }
    }

    #[test]
    fn test_first_answer_is_recorded() {
        let mut settings = TelemetrySettings::default();
        let mut prompter = LinePrompter::new(Cursor::new("yes\n"), Vec::new());

        let outcome = resolve_opt_in(&mut settings, "taco", &mut prompter).unwrap();

        assert!(outcome.opted_in);
        assert!(!outcome.newly_declined);
        assert_eq!(settings.opt_in, Some(true));
        let shown = String::from_utf8(prompter.into_output()).unwrap();
        assert!(shown.contains("improve taco"));
    }

    #[test]
    fn test_decline_is_flagged_once() {
        let mut settings = TelemetrySettings::default();
        let mut prompter = LinePrompter::new(Cursor::new("N\n"), Vec::new());

        let first = resolve_opt_in(&mut settings, "taco", &mut prompter).unwrap();
        assert!(!first.opted_in);
        assert!(first.newly_declined);

        let second = resolve_opt_in(&mut settings, "taco", &mut PanicPrompter).unwrap();
        assert!(!second.opted_in);
        assert!(!second.newly_declined);
    }

    #[test]
    fn test_line_prompter_reasks_until_valid_answer() {
        let mut prompter = LinePrompter::new(Cursor::new("maybe\n\ny\n"), Vec::new());
        assert!(prompter.ask_yes_no("Continue? ").unwrap());
        let shown = String::from_utf8(prompter.into_output()).unwrap();
        assert_eq!(shown.matches("Continue? ").count(), 3);
    }

    #[test]
    fn test_closed_input_fails_and_leaves_decision_unset() {
        let mut settings = TelemetrySettings::default();
        let mut prompter = LinePrompter::new(Cursor::new(""), Vec::new());

        let result = resolve_opt_in(&mut settings, "taco", &mut prompter);
        assert!(matches!(result, Err(TelemetryError::PromptError(_))));
        assert_eq!(settings.opt_in, None);
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no(" Y \n"), Some(true));
        assert_eq!(parse_yes_no("No"), Some(false));
        assert_eq!(parse_yes_no("sure"), None);
    }
}
