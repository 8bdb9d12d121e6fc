//! Interactive prompts for missing configuration

use anyhow::{Context, Result};
use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{DefaultEditor, Editor, Helper};
use std::borrow::Cow;

/// Source of answers for the first-run configuration gate
pub trait Prompter {
    /// Ask for a plain value; returns the line without its trailing newline
    fn ask(&mut self, prompt: &str) -> Result<String>;

    /// Ask for a value that must not be echoed
    fn ask_secret(&mut self, prompt: &str) -> Result<String>;
}

/// Renders every typed character as `*`
#[derive(Default)]
struct MaskingHelper;

impl Completer for MaskingHelper {
    type Candidate = String;
}

impl Hinter for MaskingHelper {
    type Hint = String;
}

impl Validator for MaskingHelper {}

impl Highlighter for MaskingHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned("*".repeat(line.chars().count()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Helper for MaskingHelper {}

/// Terminal prompts backed by rustyline
///
/// The terminal is only opened on the first question, so a complete config
/// never touches the console.
#[derive(Default)]
pub struct TerminalPrompter {
    editor: Option<DefaultEditor>,
    masked: Option<Editor<MaskingHelper, DefaultHistory>>,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        let mut editor = match self.editor.take() {
            Some(editor) => editor,
            None => DefaultEditor::new().context("Failed to open terminal for prompts")?,
        };
        let line = editor.readline(prompt);
        self.editor = Some(editor);
        line.with_context(|| format!("No answer for '{}'", prompt.trim()))
    }

    fn ask_secret(&mut self, prompt: &str) -> Result<String> {
        let mut editor = match self.masked.take() {
            Some(editor) => editor,
            None => {
                let mut editor = Editor::new().context("Failed to open terminal for prompts")?;
                editor.set_helper(Some(MaskingHelper));
                editor
            }
        };
        let line = editor.readline(prompt);
        self.masked = Some(editor);
        line.with_context(|| format!("No answer for '{}'", prompt.trim()))
    }
}
