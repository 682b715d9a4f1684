// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Confirmation strategies for interactive operations

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

/// Asks the operator before destructive or ambiguous steps
pub trait Prompt {
    /// Yes/no question
    fn confirm(&self, question: &str) -> bool;

    /// Pick one of `options`; returns a zero-based index
    fn choose(&self, question: &str, options: &[String]) -> usize;
}

/// Reads answers from the terminal
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(question: &str) -> String {
        eprint!("{question} ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim().to_lowercase()
    }
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str) -> bool {
        matches!(Self::read_line(&format!("{question} (yes/no):")).as_str(), "yes" | "y")
    }

    fn choose(&self, question: &str, options: &[String]) -> usize {
        for (i, option) in options.iter().enumerate() {
            eprintln!("{}. {}", i + 1, option);
        }
        loop {
            let answer = Self::read_line(&format!("{question} (enter number, default=1):"));
            if answer.is_empty() {
                return 0;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return n - 1,
                Ok(_) => eprintln!("Invalid selection. Please enter a number from the list."),
                Err(_) => eprintln!("Invalid input. Please enter a number."),
            }
        }
    }
}

/// Gives the same answer to every question without asking
#[derive(Debug, Clone, Copy)]
pub struct AssumeAnswer {
    /// Answer returned by [`Prompt::confirm`]
    pub yes: bool,
}

impl Prompt for AssumeAnswer {
    fn confirm(&self, question: &str) -> bool {
        tracing::debug!("{} -> {}", question, if self.yes { "yes" } else { "no" });
        self.yes
    }

    fn choose(&self, _question: &str, _options: &[String]) -> usize {
        0
    }
}

/// Replays canned answers and records every question asked
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: RefCell<VecDeque<bool>>,
    choices: RefCell<VecDeque<usize>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompt {
    /// Prompt answering `answers` in order, then "no"
    #[must_use]
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Queue choices returned by [`Prompt::choose`], then the first option
    #[must_use]
    pub fn with_choices(self, choices: &[usize]) -> Self {
        self.choices.borrow_mut().extend(choices.iter().copied());
        self
    }

    /// Questions asked so far
    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str) -> bool {
        self.asked.borrow_mut().push(question.to_string());
        self.answers.borrow_mut().pop_front().unwrap_or(false)
    }

    fn choose(&self, question: &str, options: &[String]) -> usize {
        self.asked.borrow_mut().push(question.to_string());
        let choice = self.choices.borrow_mut().pop_front().unwrap_or(0);
        choice.min(options.len().saturating_sub(1))
    }
}

impl<P: Prompt + ?Sized> Prompt for std::rc::Rc<P> {
    fn confirm(&self, question: &str) -> bool {
        (**self).confirm(question)
    }

    fn choose(&self, question: &str, options: &[String]) -> usize {
        (**self).choose(question, options)
    }
}
