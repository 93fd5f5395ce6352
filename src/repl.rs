use std::borrow::Cow;

use colored::{ColoredString, Colorize};
use rustyline::{
    highlight::Highlighter,
    history::DefaultHistory,
    validate::{ValidationContext, ValidationResult, Validator},
    Completer, Editor, Helper, Hinter,
};

use crate::{
    parser::{
        atom,
        tokens::{tokenize, Token, TokenSpan},
    },
    syntax::{Expression, SpecialForm},
};

pub const PROMPT: &str = "lispy> ";

pub type Repl = Editor<LispHelper, DefaultHistory>;

/// Line-editor hooks: token highlighting, and holding the line open while a
/// list or string literal is still unfinished.
#[derive(Helper, Completer, Hinter)]
pub struct LispHelper;

impl Highlighter for LispHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        match tokenize(line) {
            Ok(tokens) => Cow::Owned(highlight_tokens(&tokens, line)),
            Err(_) => Cow::Borrowed(line),
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Validator for LispHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        Ok(if is_complete(ctx.input()) {
            ValidationResult::Valid(None)
        } else {
            ValidationResult::Incomplete
        })
    }
}

/// Input is complete once every string is closed, no list is left open and
/// no quote is waiting for its datum. Too many closing parentheses count as
/// complete so the reader can report them.
pub fn is_complete(input: &str) -> bool {
    let Ok(tokens) = tokenize(input) else {
        return false;
    };
    let mut depth = 0i64;
    for (token, _) in &tokens {
        match token {
            Token::LeftParen => depth += 1,
            Token::RightParen => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !matches!(tokens.last(), Some((Token::Quote(_), _)))
}

fn highlight_tokens(tokens: &[TokenSpan], s: &str) -> String {
    let mut next_start = 0;
    let mut highlighted = String::new();
    for (token, span) in tokens {
        if next_start < span.start {
            highlighted.push_str(&s[next_start..span.start]);
        }
        highlighted.push_str(&highlight_token(token, &s[span.clone()]).to_string());
        next_start = span.end;
    }
    if next_start < s.len() {
        highlighted.push_str(&s[next_start..]);
    }
    highlighted
}

fn highlight_token(token: &Token, s: &str) -> ColoredString {
    match token {
        Token::Quote(_) => s.bright_blue(),
        Token::String(_) => s.green(),
        Token::Atom(text) => match atom(text) {
            Ok(Expression::Boolean(_)) => s.red(),
            Ok(Expression::Integer(_) | Expression::Float(_) | Expression::Complex(_)) => s.yellow(),
            Ok(Expression::Symbol(symbol)) if SpecialForm::from_symbol(symbol).is_some() => {
                s.magenta()
            }
            Ok(Expression::Symbol(_)) => s.blue(),
            _ => s.normal(),
        },
        Token::LeftParen | Token::RightParen => s.normal(),
    }
}

#[test]
fn test_is_complete() {
    assert!(is_complete("(+ 1 2)"));
    assert!(is_complete("x ; comment"));
    assert!(is_complete(""));
    assert!(is_complete("(+ 1 2))"));
    assert!(!is_complete("(define (f x)"));
    assert!(!is_complete("(display \"open"));
    assert!(!is_complete("'"));
    assert!(!is_complete("(list ; ) in a comment"));
}

#[test]
fn test_highlight_keeps_text() {
    colored::control::set_override(false);
    let line = "(define x 'y) ; note";
    let tokens = tokenize(line).unwrap();
    assert_eq!(highlight_tokens(&tokens, line), line);
}
