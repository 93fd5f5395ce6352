pub mod tokens;

use std::{io::BufRead, num::IntErrorKind, str::Chars};

use num_complex::Complex64;

use crate::{
    error::{LispError, LispResult},
    syntax::{Expression, Quotation, Symbol},
};

use self::tokens::{InPort, Token};

/// Deepest nesting of lists and quote abbreviations the reader accepts.
pub const MAX_NESTING: usize = 512;

/// Reads one expression from `port`. `None` means the input ended cleanly
/// before any token.
pub fn read<R: BufRead>(port: &mut InPort<R>) -> LispResult<Option<Expression>> {
    read_nested(port, 0)
}

fn read_nested<R: BufRead>(port: &mut InPort<R>, depth: usize) -> LispResult<Option<Expression>> {
    match port.next_token()? {
        None => Ok(None),
        Some(token) => read_ahead(token, port, depth).map(Some),
    }
}

fn read_ahead<R: BufRead>(
    token: Token,
    port: &mut InPort<R>,
    depth: usize,
) -> LispResult<Expression> {
    if depth > MAX_NESTING {
        return Err(LispError::syntax("expression nested too deeply"));
    }
    match token {
        Token::LeftParen => {
            let mut items = Vec::new();
            loop {
                match port.next_token()? {
                    Some(Token::RightParen) => return Ok(Expression::list(items)),
                    Some(token) => items.push(read_ahead(token, port, depth + 1)?),
                    None => return Err(LispError::syntax("unexpected EOF in list")),
                }
            }
        }
        Token::RightParen => Err(LispError::syntax("unexpected closing parenthesis")),
        Token::Quote(quotation) => match read_nested(port, depth + 1)? {
            Some(expr) => Ok(Expression::list(vec![
                Expression::Symbol(quotation.symbol()),
                expr,
            ])),
            None => Err(LispError::syntax(format!(
                "unexpected EOF after {}",
                Quotation::TEXT[quotation]
            ))),
        },
        Token::String(text) | Token::Atom(text) => atom(&text),
    }
}

/// Parses the first expression in `source`.
pub fn parse(source: &str) -> LispResult<Option<Expression>> {
    let mut port: InPort<&[u8]> = InPort::from(source);
    read(&mut port)
}

/// Parses every expression in `source`.
pub fn parse_all(source: &str) -> LispResult<Vec<Expression>> {
    let mut port: InPort<&[u8]> = InPort::from(source);
    let mut exprs = Vec::new();
    while let Some(expr) = read(&mut port)? {
        exprs.push(expr);
    }
    Ok(exprs)
}

/// Numeric readings of a bare token, tried in this order. `Ok(None)` passes
/// the token on to the next reading.
const NUMBER_PARSERS: [fn(&str) -> LispResult<Option<Expression>>; 3] =
    [parse_integer, parse_float, parse_complex];

/// Converts a single token into an atom. Booleans first, then string
/// literals, then numbers; whatever is left is a symbol.
pub fn atom(token: &str) -> LispResult<Expression> {
    match token {
        "#t" => return Ok(Expression::Boolean(true)),
        "#f" => return Ok(Expression::Boolean(false)),
        _ => {}
    }

    if let Some(literal) = token.strip_prefix('"') {
        let body = literal
            .strip_suffix('"')
            .ok_or_else(|| LispError::syntax("unterminated string literal"))?;
        return Ok(Expression::String(unescape(body)?.into()));
    }

    let number = NUMBER_PARSERS
        .iter()
        .find_map(|parse| parse(token).transpose())
        .transpose()?;
    Ok(number.unwrap_or_else(|| Expression::Symbol(Symbol::intern(token))))
}

/// Integers are 64-bit. A literal outside that range is rejected rather
/// than read as an approximate float.
fn parse_integer(token: &str) -> LispResult<Option<Expression>> {
    match token.parse::<i64>() {
        Ok(n) => Ok(Some(Expression::Integer(n))),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => Err(
            LispError::syntax(format!("integer literal `{token}` is out of range")),
        ),
        Err(_) => Ok(None),
    }
}

fn parse_float(token: &str) -> LispResult<Option<Expression>> {
    Ok(token.parse().ok().map(Expression::Float))
}

fn parse_complex(token: &str) -> LispResult<Option<Expression>> {
    Ok(complex_literal(token).map(Expression::Complex))
}

/// `<imag>i` or `<real>±<imag>i`. A lone sign stands for a coefficient of
/// one, so `-i` and `1+i` are complex, but a bare `i` is left as a symbol.
fn complex_literal(token: &str) -> Option<Complex64> {
    fn imaginary(text: &str) -> Option<f64> {
        match text {
            "+" => Some(1.0),
            "-" => Some(-1.0),
            _ => text.parse().ok(),
        }
    }

    let body = token.strip_suffix('i')?;
    let split = body
        .char_indices()
        .rev()
        .find(|&(index, c)| {
            index > 0 && matches!(c, '+' | '-') && !body[..index].ends_with(['e', 'E'])
        })
        .map(|(index, _)| index);

    let (re, im) = match split {
        Some(index) => (body[..index].parse().ok()?, imaginary(&body[index..])?),
        None => (0.0, imaginary(body)?),
    };
    Some(Complex64::new(re, im))
}

fn unescape(body: &str) -> LispResult<String> {
    let mut decoded = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        let escaped = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('a') => '\x07',
            Some('b') => '\x08',
            Some('f') => '\x0c',
            Some('v') => '\x0b',
            Some(c @ ('\\' | '"' | '\'')) => c,
            Some('x') => hex_escape(&mut chars, 2)?,
            Some('u') => hex_escape(&mut chars, 4)?,
            Some('U') => hex_escape(&mut chars, 8)?,
            // Backslash-newline continues the literal on the next line.
            Some('\n') => continue,
            Some(other) => {
                decoded.push('\\');
                other
            }
            None => return Err(LispError::syntax("trailing backslash in string literal")),
        };
        decoded.push(escaped);
    }
    Ok(decoded)
}

fn hex_escape(chars: &mut Chars, digits: usize) -> LispResult<char> {
    let code: String = chars.by_ref().take(digits).collect();
    if code.len() != digits || !code.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LispError::syntax(format!("truncated escape sequence `{code}`")));
    }
    u32::from_str_radix(&code, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| LispError::syntax(format!("invalid character code `{code}`")))
}

#[cfg(test)]
use crate::lisp_macro::lisp;

#[test]
fn test_parse_program() {
    assert_eq!(
        parse("(begin (define r 10) (* pi (* r r)))").unwrap(),
        Some(lisp! { (begin (define r 10) (* pi (* r r))) })
    );
    assert_eq!(parse("()").unwrap(), Some(Expression::nil()));
}

#[test]
fn test_end_of_input() {
    assert_eq!(parse("").unwrap(), None);
    assert_eq!(parse("   ; nothing here\n").unwrap(), None);
}

#[test]
fn test_quote_abbreviations() {
    assert_eq!(parse("'x").unwrap(), Some(lisp! { (quote x) }));
    let splice = Expression::list(vec![Expression::symbol("unquote-splicing"), lisp! { c }]);
    assert_eq!(
        parse("`(a ,b ,@c)").unwrap(),
        Some(Expression::list(vec![
            lisp! { quasiquote },
            Expression::list(vec![lisp! { a }, lisp! { (unquote b) }, splice]),
        ]))
    );
    assert_eq!(
        parse("''()").unwrap(),
        Some(lisp! { (quote (quote ())) })
    );
}

#[test]
fn test_syntax_errors() {
    for source in ["(+ 1 2", ")", "'", "(display \"unfinished)"] {
        assert!(
            matches!(parse(source), Err(LispError::SyntaxError(_))),
            "{source:?} should not parse"
        );
    }
}

#[test]
fn test_parse_all() {
    let exprs = parse_all("(define x 1)\n; comment\nx 'y").unwrap();
    assert_eq!(
        exprs,
        vec![lisp! { (define x 1) }, lisp! { x }, lisp! { (quote y) }]
    );
}

#[test]
fn test_atoms() {
    use Expression as E;
    assert_eq!(atom("#t").unwrap(), E::Boolean(true));
    assert_eq!(atom("#f").unwrap(), E::Boolean(false));
    assert_eq!(atom("42").unwrap(), E::Integer(42));
    assert_eq!(atom("-7").unwrap(), E::Integer(-7));
    assert_eq!(atom("+7").unwrap(), E::Integer(7));
    assert_eq!(atom("1.5").unwrap(), E::Float(1.5));
    assert_eq!(atom("1e3").unwrap(), E::Float(1000.0));
    assert_eq!(atom("100.00").unwrap(), E::Float(100.0));
    assert_eq!(atom("2i").unwrap(), E::Complex(Complex64::new(0.0, 2.0)));
    assert_eq!(atom("1+2i").unwrap(), E::Complex(Complex64::new(1.0, 2.0)));
    assert_eq!(atom("1.5-0.5i").unwrap(), E::Complex(Complex64::new(1.5, -0.5)));
    assert_eq!(atom("1e-3+2e+1i").unwrap(), E::Complex(Complex64::new(0.001, 20.0)));
    assert_eq!(atom("-i").unwrap(), E::Complex(Complex64::new(0.0, -1.0)));
    assert_eq!(atom("+i").unwrap(), E::Complex(Complex64::new(0.0, 1.0)));
    assert_eq!(atom("1+i").unwrap(), E::Complex(Complex64::new(1.0, 1.0)));
    assert_eq!(atom("2.5-i").unwrap(), E::Complex(Complex64::new(2.5, -1.0)));
    assert_eq!(atom("9223372036854775807").unwrap(), E::Integer(i64::MAX));
    for symbol in ["x", "i", "pi", "hi", "e+i", "set!", "-", "...", "1+", "foo->bar", "#true"] {
        assert_eq!(atom(symbol).unwrap(), E::symbol(symbol), "{symbol}");
    }
}

#[test]
fn test_string_atoms() {
    use Expression as E;
    assert_eq!(atom(r#""hello""#).unwrap(), E::string("hello"));
    assert_eq!(atom(r#""""#).unwrap(), E::string(""));
    assert_eq!(atom(r#""\"Go!\"""#).unwrap(), E::string("\"Go!\""));
    assert_eq!(atom(r#""a\\b\n\tc""#).unwrap(), E::string("a\\b\n\tc"));
    assert_eq!(atom(r#""\x41é""#).unwrap(), E::string("Aé"));
    assert_eq!(atom(r#""\q""#).unwrap(), E::string("\\q"));
    assert!(atom(r#""\x4""#).is_err());
    assert!(atom("\"open").is_err());
}

#[test]
fn test_out_of_range_integers() {
    for token in ["99999999999999999999", "-9223372036854775809", "+18446744073709551616"] {
        assert!(
            matches!(atom(token), Err(LispError::SyntaxError(_))),
            "{token} should be rejected"
        );
    }
    assert!(matches!(
        parse("(+ 1 99999999999999999999)"),
        Err(LispError::SyntaxError(_))
    ));
}

#[test]
fn test_nesting_limit() {
    for source in ["(".repeat(100_000), "'".repeat(100_000) + "x"] {
        assert!(matches!(
            parse(&source),
            Err(LispError::SyntaxError(message)) if message.contains("nested too deeply")
        ));
    }

    let deep = "(".repeat(MAX_NESTING) + &")".repeat(MAX_NESTING);
    let mut expr = parse(&deep).unwrap().unwrap();
    let mut levels = 1;
    while let Expression::List(items) = expr {
        match items.first() {
            Some(inner) => {
                expr = inner.clone();
                levels += 1;
            }
            None => break,
        }
    }
    assert_eq!(levels, MAX_NESTING);

    let too_deep = "(".repeat(MAX_NESTING + 2) + &")".repeat(MAX_NESTING + 2);
    assert!(matches!(parse(&too_deep), Err(LispError::SyntaxError(_))));
}
