use std::{io::BufRead, ops::Range};

use winnow::{
    ascii::multispace1,
    combinator::{alt, repeat},
    token::{any, none_of, take_while},
    PResult, Parser,
};

use crate::{
    error::{LispError, LispResult},
    syntax::Quotation,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LeftParen,
    RightParen,
    Quote(Quotation),
    /// A string literal exactly as written, surrounding quotes included.
    String(String),
    /// Any other run of characters: numbers, booleans and symbols.
    Atom(String),
}

pub type TokenSpan = (Token, Range<usize>);

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '\'' | '"' | '`' | ',' | ';')
}

fn comment(input: &mut &str) -> PResult<()> {
    (';', take_while(0.., |c: char| c != '\n'))
        .void()
        .parse_next(input)
}

/// Whitespace and comments between tokens.
fn trivia(input: &mut &str) -> PResult<()> {
    repeat(0.., alt((multispace1.void(), comment))).parse_next(input)
}

fn string_body(input: &mut &str) -> PResult<()> {
    repeat(
        0..,
        alt((('\\', any).void(), none_of(['\\', '"']).void())),
    )
    .parse_next(input)
}

fn string_literal<'a>(input: &mut &'a str) -> PResult<&'a str> {
    ('"', string_body, '"').recognize().parse_next(input)
}

fn token(input: &mut &str) -> PResult<Token> {
    alt((
        ",@".value(Token::Quote(Quotation::UnquoteSplicing)),
        '('.value(Token::LeftParen),
        ')'.value(Token::RightParen),
        '\''.value(Token::Quote(Quotation::Quote)),
        '`'.value(Token::Quote(Quotation::Quasiquote)),
        ','.value(Token::Quote(Quotation::Unquote)),
        string_literal.map(|s: &str| Token::String(s.to_owned())),
        take_while(1.., is_atom_char).map(|s: &str| Token::Atom(s.to_owned())),
    ))
    .parse_next(input)
}

enum Lexed {
    Token(Token),
    /// Only whitespace or comments were left.
    Exhausted,
    /// A string literal was opened but not closed.
    Unterminated,
}

/// Skips trivia and reads one token, advancing `input` past it.
fn lex(input: &mut &str) -> Lexed {
    // Zero or more repetitions, so this never fails.
    let _ = trivia(input);
    if input.is_empty() {
        return Lexed::Exhausted;
    }
    match token(input) {
        Ok(token) => Lexed::Token(token),
        Err(_) => Lexed::Unterminated,
    }
}

/// Splits a complete piece of text into tokens with their byte ranges.
pub fn tokenize(source: &str) -> LispResult<Vec<TokenSpan>> {
    let mut input = source;
    let mut tokens = Vec::new();
    loop {
        let mut rest = input;
        let lexed = lex(&mut rest);
        let end = source.len() - rest.len();
        match lexed {
            Lexed::Token(token) => {
                let start = end - token_len(&input[..input.len() - rest.len()]);
                tokens.push((token, start..end));
            }
            Lexed::Exhausted => return Ok(tokens),
            Lexed::Unterminated => return Err(LispError::syntax("unterminated string literal")),
        }
        input = rest;
    }
}

/// Length of the token at the end of `consumed`, which starts with trivia.
fn token_len(consumed: &str) -> usize {
    let mut trimmed = consumed;
    let _ = trivia(&mut trimmed);
    trimmed.len()
}

/// A source of tokens read lazily from a line-oriented reader.
///
/// Unconsumed text stays in `line` between calls, so an expression may span
/// any number of reads.
pub struct InPort<R> {
    source: R,
    line: String,
}

impl<R: BufRead> InPort<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            line: String::new(),
        }
    }

    /// Appends the next line of input to the buffer. Returns `false` at end of input.
    fn fill(&mut self) -> LispResult<bool> {
        Ok(self.source.read_line(&mut self.line)? > 0)
    }

    /// The next token, or `None` once the source is exhausted.
    pub fn next_token(&mut self) -> LispResult<Option<Token>> {
        loop {
            if self.line.is_empty() && !self.fill()? {
                return Ok(None);
            }

            let mut rest = self.line.as_str();
            let lexed = lex(&mut rest);
            let consumed = self.line.len() - rest.len();
            match lexed {
                Lexed::Token(token) => {
                    self.line.drain(..consumed);
                    return Ok(Some(token));
                }
                Lexed::Exhausted => self.line.clear(),
                Lexed::Unterminated => {
                    self.line.drain(..consumed);
                    if !self.fill()? {
                        self.line.clear();
                        return Err(LispError::syntax("unterminated string literal"));
                    }
                }
            }
        }
    }
}

impl<'a> From<&'a str> for InPort<&'a [u8]> {
    fn from(value: &'a str) -> Self {
        InPort::new(value.as_bytes())
    }
}

#[cfg(test)]
fn collect_tokens(source: &str) -> Vec<Token> {
    let mut port: InPort<&[u8]> = InPort::from(source);
    let mut tokens = Vec::new();
    while let Some(token) = port.next_token().unwrap() {
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
fn atoms(texts: &[&str]) -> Vec<Token> {
    texts
        .iter()
        .map(|text| match *text {
            "(" => Token::LeftParen,
            ")" => Token::RightParen,
            "'" => Token::Quote(Quotation::Quote),
            "`" => Token::Quote(Quotation::Quasiquote),
            "," => Token::Quote(Quotation::Unquote),
            ",@" => Token::Quote(Quotation::UnquoteSplicing),
            s if s.starts_with('"') => Token::String(s.to_string()),
            s => Token::Atom(s.to_string()),
        })
        .collect()
}

#[test]
fn test_empty_input() {
    assert_eq!(collect_tokens(""), vec![]);
    assert_eq!(collect_tokens("    "), vec![]);
    assert_eq!(collect_tokens("; some comment"), vec![]);
    assert_eq!(collect_tokens("\n\n; one\n  ; two\n"), vec![]);
}

#[test]
fn test_quotes() {
    assert_eq!(collect_tokens("'`,,@,"), atoms(&["'", "`", ",", ",@", ","]));
    assert_eq!(
        collect_tokens(",@(* 2 345)"),
        atoms(&[",@", "(", "*", "2", "345", ")"])
    );
}

#[test]
fn test_atoms_and_strings() {
    assert_eq!(collect_tokens("foo->bar!"), atoms(&["foo->bar!"]));
    assert_eq!(
        collect_tokens("(if #t (newline))"),
        atoms(&["(", "if", "#t", "(", "newline", ")", ")"])
    );
    assert_eq!(
        collect_tokens("  ( display  \"Hello World! \" )  "),
        atoms(&["(", "display", "\"Hello World! \"", ")"])
    );
    assert_eq!(
        collect_tokens(r#"(foo->bar "\"Go!\"")"#),
        atoms(&["(", "foo->bar", r#""\"Go!\"""#, ")"])
    );
}

#[test]
fn test_trailing_comment() {
    assert_eq!(
        collect_tokens("(begin (define r 10) (* pi (* r r))) ; comment"),
        atoms(&[
            "(", "begin", "(", "define", "r", "10", ")", "(", "*", "pi", "(", "*", "r", "r", ")",
            ")", ")"
        ])
    );
}

#[test]
fn test_tokens_span_lines() {
    assert_eq!(
        collect_tokens("(define x ; the answer\n  42)\n"),
        atoms(&["(", "define", "x", "42", ")"])
    );
    assert_eq!(
        collect_tokens("(display \"two\nlines\")"),
        atoms(&["(", "display", "\"two\nlines\"", ")"])
    );
}

#[test]
fn test_unterminated_string() {
    let mut port: InPort<&[u8]> = InPort::from("(display \"oops)\n");
    assert_eq!(port.next_token().unwrap(), Some(Token::LeftParen));
    assert_eq!(port.next_token().unwrap(), Some(Token::Atom("display".into())));
    assert!(matches!(port.next_token(), Err(LispError::SyntaxError(_))));
}

#[test]
fn test_tokenize_spans() {
    let source = "(+ 1 ; one\n \"a b\")";
    let tokens = tokenize(source).unwrap();
    let texts: Vec<&str> = tokens.iter().map(|(_, span)| &source[span.clone()]).collect();
    assert_eq!(texts, vec!["(", "+", "1", "\"a b\"", ")"]);
    assert!(tokenize("(display \"open").is_err());
}
