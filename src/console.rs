//! Operator console: interactive questions and fatal exits.
//!
//! Regular log records go through `tracing`. The question prompt writes
//! to stdout directly and keeps the stdout lock until the answer has been
//! read, so no log record from a worker can land between the question
//! and the operator's reply.

use chrono::Local;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::process;
use tracing::error;

const QUESTION_STYLE: &str = "\x1b[1;35m";
const RESET_STYLE: &str = "\x1b[0m";

/// Ask the operator `question` on the terminal and return the trimmed answer.
///
/// Returns an empty string when stdin is closed.
pub fn prompt(question: &str) -> io::Result<String> {
    let stdout = io::stdout();
    let mut output = stdout.lock();
    let stdin = io::stdin();
    let mut input = stdin.lock();
    ask(&mut input, &mut output, question)
}

/// Write `question` to `output` and read one line of answer from `input`.
pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<String> {
    write!(
        output,
        "{} {}QUESTION{} {}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z"),
        QUESTION_STYLE,
        RESET_STYLE,
        question
    )?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

/// Whether an operator answer confirms the question.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.chars().next(), Some('y' | 'Y'))
}

/// Log an unrecoverable error, run `teardown`, and exit with status 1.
pub fn fatal<E: Display + ?Sized, F: FnOnce()>(err: &E, teardown: F) -> ! {
    error!(error = %err, "Fatal error");
    teardown();
    process::exit(1)
}
