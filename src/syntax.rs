use std::{
    collections::HashSet,
    fmt::{self, Display},
    hash::{Hash, Hasher},
    rc::Rc,
    sync::{Mutex, PoisonError},
};

use derivative::Derivative;
use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use lazy_static::lazy_static;
use num_complex::Complex64;

use crate::{functions::BaseFunction, interpreter::ContextRef};

lazy_static! {
    static ref SYMBOL_TABLE: Mutex<HashSet<&'static str>> = Mutex::new(HashSet::new());
    static ref SPECIAL_FORM_SYMBOLS: EnumMap<SpecialForm, Symbol> =
        SpecialForm::TEXT.map(|_, text| Symbol::intern(text));
}

/// An interned name. Two symbols with the same text share one allocation, so
/// equality is a pointer comparison.
#[derive(Clone, Copy)]
pub struct Symbol(&'static str);

impl Symbol {
    pub fn intern(name: &str) -> Self {
        let mut table = SYMBOL_TABLE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(interned) = table.get(name).copied() {
            return Symbol(interned);
        }
        let interned: &'static str = Box::leak(Box::<str>::from(name));
        table.insert(interned);
        Symbol(interned)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Heads handled by the evaluator itself instead of being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum SpecialForm {
    Quote,
    If,
    Define,
    Set,
    Lambda,
}

impl SpecialForm {
    pub const TEXT: EnumMap<Self, &'static str> =
        EnumMap::from_array(["quote", "if", "define", "set!", "lambda"]);

    pub fn from_symbol(symbol: Symbol) -> Option<Self> {
        SPECIAL_FORM_SYMBOLS
            .iter()
            .find_map(|(form, interned)| (*interned == symbol).then_some(form))
    }

    pub fn symbol(self) -> Symbol {
        SPECIAL_FORM_SYMBOLS[self]
    }
}

/// The reader abbreviations `'`, `` ` ``, `,` and `,@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum Quotation {
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplicing,
}

impl Quotation {
    pub const TEXT: EnumMap<Self, &'static str> =
        EnumMap::from_array(["quote", "quasiquote", "unquote", "unquote-splicing"]);

    pub fn symbol(self) -> Symbol {
        Symbol::intern(Self::TEXT[self])
    }
}

/// Both program text and runtime data.
///
/// Lists are reference counted slices: cloning an expression never copies a
/// tree, and nothing in the evaluator mutates one in place.
#[derive(Derivative, Clone)]
#[derivative(PartialEq, Debug)]
pub enum Expression {
    /// Result of forms evaluated only for their effect (`define`, `set!`, `display`).
    Void,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Complex(Complex64),
    String(Rc<str>),
    Symbol(Symbol),
    List(Rc<[Expression]>),
    Procedure(#[derivative(PartialEq(compare_with = "Rc::ptr_eq"))] Rc<Procedure>),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub enum Procedure {
    Primitive {
        name: &'static str,
        #[derivative(Debug = "ignore")]
        function: BaseFunction,
    },
    Closure(Closure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    Fixed(Vec<Symbol>),
    /// `(lambda args body)` collects every argument into one list.
    Variadic(Symbol),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Closure {
    pub params: Parameters,
    pub body: Expression,
    #[derivative(Debug = "ignore")]
    pub context: ContextRef,
}

impl Expression {
    pub fn list(items: impl Into<Rc<[Expression]>>) -> Self {
        Self::List(items.into())
    }

    pub fn nil() -> Self {
        Self::list(Vec::new())
    }

    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::intern(name))
    }

    pub fn string(text: &str) -> Self {
        Self::String(Rc::from(text))
    }

    /// Everything except `#f` is true, including the empty list.
    pub fn truthy(&self) -> bool {
        !matches!(self, Self::Boolean(false))
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Symbol(symbol) => Some(*symbol),
            _ => None,
        }
    }

    /// `eq?`: same object for lists, strings and procedures, same value for
    /// atoms. Empty lists are all the same object.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Self::String(a), Self::String(b)) => Rc::ptr_eq(a, b),
            (Self::Procedure(a), Self::Procedure(b)) => Rc::ptr_eq(a, b),
            (a, b) => a == b,
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => Ok(()),
            Self::Boolean(true) => write!(f, "#t"),
            Self::Boolean(false) => write!(f, "#f"),
            Self::Integer(x) => write!(f, "{x}"),
            // Debug keeps the fractional part, so the text reads back as a float.
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Complex(z) if z.re == 0.0 && z.re.is_sign_positive() => write!(f, "{:?}i", z.im),
            Self::Complex(z) => write!(
                f,
                "{:?}{}{:?}i",
                z.re,
                if z.im.is_sign_negative() { '-' } else { '+' },
                z.im.abs()
            ),
            Self::String(s) => write_escaped(f, s),
            Self::Symbol(symbol) => write!(f, "{symbol}"),
            Self::List(items) => write!(f, "({})", items.iter().join(" ")),
            Self::Procedure(procedure) => write!(f, "{procedure}"),
        }
    }
}

impl Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive { name, .. } => write!(f, "#<primitive {name}>"),
            Self::Closure(closure) => match &closure.params {
                Parameters::Fixed(params) => write!(f, "#<lambda ({})>", params.iter().join(" ")),
                Parameters::Variadic(rest) => write!(f, "#<lambda {rest}>"),
            },
        }
    }
}

impl From<Vec<Expression>> for Expression {
    fn from(value: Vec<Expression>) -> Self {
        Expression::list(value)
    }
}

impl From<Procedure> for Expression {
    fn from(value: Procedure) -> Self {
        Expression::Procedure(Rc::new(value))
    }
}

#[test]
fn test_symbols_are_interned() {
    let a = Symbol::intern("make-account");
    let b = Symbol::intern(&String::from("make-account"));
    assert_eq!(a, b);
    assert!(std::ptr::eq(a.as_str(), b.as_str()));
    assert_ne!(a, Symbol::intern("make-acount"));
}

#[test]
fn test_special_form_lookup() {
    assert_eq!(SpecialForm::from_symbol(Symbol::intern("set!")), Some(SpecialForm::Set));
    assert_eq!(SpecialForm::from_symbol(Symbol::intern("begin")), None);
    assert_eq!(SpecialForm::Lambda.symbol().as_str(), "lambda");
}

#[test]
fn test_display() {
    use Expression as E;
    let expr = E::list(vec![
        E::symbol("display"),
        E::string("say \"hi\"\n"),
        E::Boolean(true),
        E::Float(80.0),
        E::Complex(Complex64::new(1.0, -2.0)),
        E::Complex(Complex64::new(0.0, 3.0)),
        E::nil(),
    ]);
    assert_eq!(
        expr.to_string(),
        r#"(display "say \"hi\"\n" #t 80.0 1.0-2.0i 3.0i ())"#
    );
    assert_eq!(E::Void.to_string(), "");
}

#[test]
fn test_identity() {
    use Expression as E;
    let list = E::list(vec![E::Integer(1)]);
    assert!(list.is_identical(&list.clone()));
    assert!(!list.is_identical(&E::list(vec![E::Integer(1)])));
    assert!(E::nil().is_identical(&E::nil()));
    assert!(E::symbol("a").is_identical(&E::symbol("a")));
    assert!(E::Integer(3).is_identical(&E::Integer(3)));
}
