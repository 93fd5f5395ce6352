mod math;

use std::{cmp::Ordering, collections::HashMap};

use itertools::Itertools;
use lazy_static::lazy_static;
use literally::hmap;

use crate::{
    error::{Args, LispError, LispResult},
    interpreter::{Context, ExprResult, Interpreter},
    number::{float_to_integer, Number},
    syntax::{Expression, Procedure, Symbol},
};

/// A host procedure. Receives its arguments already evaluated, plus the
/// interpreter for primitives that call back into procedures or write output.
pub type BaseFunction = fn(Vec<Expression>, &Interpreter) -> ExprResult;

macro_rules! fold_op {
    ( $init:expr, $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            fold_numbers(args, Number::Integer($init), $f)
        }) as BaseFunction
    };
}

/// `-` and `/`: a single argument is negated or inverted, more are folded
/// from the first.
macro_rules! inverse_op {
    ( $unary:expr, $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let mut args = args;
            if args.is_empty() {
                return Err(LispError::arity(">= 1", 0));
            }
            let first = Number::try_from(args.remove(0))?;
            if args.is_empty() {
                return $unary(first).map(Expression::from);
            }
            fold_numbers(args, first, $f)
        }) as BaseFunction
    };
}

macro_rules! compare_op {
    ( $test:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            if args.is_empty() {
                return Err(LispError::arity(">= 1", 0));
            }
            for (a, b) in args.into_iter().tuple_windows() {
                if !$test(a, b)? {
                    return Ok(Expression::Boolean(false));
                }
            }
            Ok(Expression::Boolean(true))
        }) as BaseFunction
    };
}

macro_rules! predicate {
    ( $pat:pat ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x] = args.take::<1>()?;
            Ok(Expression::Boolean(matches!(x, $pat)))
        }) as BaseFunction
    };
}

lazy_static! {
    pub static ref FUNCTIONS: HashMap<&'static str, BaseFunction> = hmap! {
        "+" => fn_add as BaseFunction,
        "*" => fold_op!(1, Number::mul),
        "-" => inverse_op!(Number::neg, Number::sub),
        "/" => inverse_op!(|x| Number::Integer(1).div(x), Number::div),
        ">" => compare_op!(|a, b| ordered(a, b, Ordering::is_gt)),
        "<" => compare_op!(|a, b| ordered(a, b, Ordering::is_lt)),
        ">=" => compare_op!(|a, b| ordered(a, b, Ordering::is_ge)),
        "<=" => compare_op!(|a, b| ordered(a, b, Ordering::is_le)),
        "=" => compare_op!(equal_values),
        "abs" => fn_abs as BaseFunction,
        "append" => fn_add as BaseFunction,
        "apply" => fn_apply as BaseFunction,
        "begin" => fn_begin as BaseFunction,
        "car" => fn_car as BaseFunction,
        "cdr" => fn_cdr as BaseFunction,
        "cons" => fn_cons as BaseFunction,
        "eq?" => fn_eq as BaseFunction,
        "equal?" => fn_equal as BaseFunction,
        "length" => fn_length as BaseFunction,
        "list" => (|args: Vec<Expression>, _: &Interpreter| -> ExprResult { Ok(Expression::list(args)) }) as BaseFunction,
        "list?" => predicate!(Expression::List(_)),
        "map" => fn_map as BaseFunction,
        "max" => (|args: Vec<Expression>, _: &Interpreter| -> ExprResult { extremum(args, Ordering::Greater) }) as BaseFunction,
        "min" => (|args: Vec<Expression>, _: &Interpreter| -> ExprResult { extremum(args, Ordering::Less) }) as BaseFunction,
        "not" => predicate!(Expression::Boolean(false)),
        "null?" => fn_null as BaseFunction,
        "number?" => predicate!(Expression::Integer(_) | Expression::Float(_) | Expression::Complex(_)),
        "procedure?" => predicate!(Expression::Procedure(_)),
        "round" => fn_round as BaseFunction,
        "symbol?" => predicate!(Expression::Symbol(_)),
        "display" => fn_display as BaseFunction,
        "newline" => fn_newline as BaseFunction,
    };
}

/// Binds every primitive and math-library name in `context`.
pub fn install(context: &Context) {
    for (name, value) in math::CONSTANTS {
        context.define(Symbol::intern(name), Expression::Float(value));
    }
    for (&name, &function) in math::FUNCTIONS.iter().chain(FUNCTIONS.iter()) {
        context.define(Symbol::intern(name), Procedure::Primitive { name, function }.into());
    }
}

fn fold_numbers(
    args: Vec<Expression>,
    init: Number,
    f: fn(Number, Number) -> LispResult<Number>,
) -> ExprResult {
    args.into_iter()
        .map(Number::try_from)
        .try_fold(init, |a, b| f(a, b?))
        .map(Expression::from)
}

fn ordered(a: Expression, b: Expression, test: fn(Ordering) -> bool) -> LispResult<bool> {
    let ordering = match (a, b) {
        (Expression::String(a), Expression::String(b)) => Some(a.cmp(&b)),
        (Expression::String(_), other) => return Err(other.type_error("string")),
        (a, b) => Number::try_from(a)?.compare(Number::try_from(b)?)?,
    };
    Ok(ordering.is_some_and(test))
}

fn equal_values(a: Expression, b: Expression) -> LispResult<bool> {
    match (Number::try_from(a.clone()), Number::try_from(b.clone())) {
        (Ok(a), Ok(b)) => Ok(a.num_eq(b)),
        _ => Ok(a == b),
    }
}

/// `+` and `append`: numeric sum, or concatenation when the first argument
/// is a list or a string.
fn fn_add(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    match args.first() {
        Some(Expression::List(_)) => {
            let mut items = Vec::new();
            for arg in args {
                items.extend(arg.into_list()?.iter().cloned());
            }
            Ok(Expression::list(items))
        }
        Some(Expression::String(_)) => {
            let mut text = String::new();
            for arg in args {
                match arg {
                    Expression::String(s) => text.push_str(&s),
                    other => return Err(other.type_error("string")),
                }
            }
            Ok(Expression::string(&text))
        }
        _ => fold_numbers(args, Number::Integer(0), Number::add),
    }
}

fn fn_abs(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [x] = args.take::<1>()?;
    Number::try_from(x)?.abs().map(Expression::from)
}

fn fn_apply(args: Vec<Expression>, interpreter: &Interpreter) -> ExprResult {
    let [f, list] = args.take::<2>()?;
    interpreter.apply(&f, list.into_list()?.to_vec())
}

/// Arguments were already evaluated in order by the caller; this only picks the last.
fn fn_begin(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    args.into_iter()
        .last()
        .ok_or_else(|| LispError::arity(">= 1", 0))
}

fn fn_car(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [list] = args.take::<1>()?;
    let items = list.into_list()?;
    if items.is_empty() {
        return Err(Expression::List(items).type_error("non-empty list"));
    }
    Ok(items[0].clone())
}

/// The cdr of `()` is `()`.
fn fn_cdr(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [list] = args.take::<1>()?;
    let items = list.into_list()?;
    Ok(Expression::list(items.get(1..).unwrap_or_default().to_vec()))
}

fn fn_cons(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [head, tail] = args.take::<2>()?;
    let tail = tail.into_list()?;
    Ok(Expression::list(
        std::iter::once(head).chain(tail.iter().cloned()).collect::<Vec<_>>(),
    ))
}

fn fn_eq(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [a, b] = args.take::<2>()?;
    Ok(Expression::Boolean(a.is_identical(&b)))
}

fn fn_equal(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [a, b] = args.take::<2>()?;
    Ok(Expression::Boolean(a == b))
}

fn fn_length(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [x] = args.take::<1>()?;
    let length = match &x {
        Expression::List(items) => Some(items.len()),
        Expression::String(s) => Some(s.chars().count()),
        _ => None,
    };
    let Some(length) = length else {
        return Err(x.type_error("list or string"));
    };
    i64::try_from(length)
        .map(Expression::Integer)
        .map_err(|_| LispError::value("a shorter sequence", x))
}

fn fn_null(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [x] = args.take::<1>()?;
    Ok(Expression::Boolean(
        matches!(x, Expression::List(items) if items.is_empty()),
    ))
}

/// Steps several lists in lockstep, ending with the shortest.
struct MapZip(Vec<std::vec::IntoIter<Expression>>);

impl Iterator for MapZip {
    type Item = Vec<Expression>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.iter_mut().map(Iterator::next).collect()
    }
}

fn fn_map(mut args: Vec<Expression>, interpreter: &Interpreter) -> ExprResult {
    if args.len() < 2 {
        return Err(LispError::arity(">= 2", args.len()));
    }
    let f = args.remove(0);
    let lists = args
        .into_iter()
        .map(|list| list.into_list().map(|items| items.to_vec().into_iter()))
        .collect::<LispResult<Vec<_>>>()?;

    MapZip(lists)
        .map(|args| interpreter.apply(&f, args))
        .collect::<LispResult<Vec<_>>>()
        .map(Expression::list)
}

/// `max` and `min` over several numbers or over the elements of one list.
fn extremum(args: Vec<Expression>, keep: Ordering) -> ExprResult {
    let values = match <[Expression; 1]>::try_from(args) {
        Ok([Expression::List(items)]) if items.is_empty() => {
            return Err(LispError::value("a non-empty list", Expression::List(items)))
        }
        Ok([Expression::List(items)]) => items.to_vec(),
        Ok([single]) => vec![single],
        Err(args) if args.is_empty() => return Err(LispError::arity(">= 1", 0)),
        Err(args) => args,
    };

    let mut values = values.into_iter();
    let mut best = values.next().ok_or_else(|| LispError::arity(">= 1", 0))?;
    let mut best_number = Number::try_from(best.clone())?;
    for value in values {
        let number = Number::try_from(value.clone())?;
        if number.compare(best_number)? == Some(keep) {
            best = value;
            best_number = number;
        }
    }
    Ok(best)
}

/// Rounds half to even. Without a digit count the result is an integer.
fn fn_round(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    fn half_even(x: f64) -> f64 {
        if (x - x.trunc()).abs() == 0.5 {
            2.0 * (x / 2.0).round()
        } else {
            x.round()
        }
    }

    match args.len() {
        1 => {
            let [x] = args.take::<1>()?;
            match Number::try_from(x)? {
                Number::Integer(n) => Ok(Expression::Integer(n)),
                n => float_to_integer(half_even(n.to_f64()?)).map(Expression::Integer),
            }
        }
        2 => {
            let [x, digits] = args.take::<2>()?;
            let digits = digits.into_integer()?;
            match Number::try_from(x)? {
                Number::Integer(n) => round_integer(n, digits).map(Expression::Integer),
                n => {
                    let exponent = i32::try_from(digits)
                        .map_err(|_| LispError::value("a digit count in range", Expression::Integer(digits)))?;
                    let scale = 10f64.powi(exponent);
                    Ok(Expression::Float(half_even(n.to_f64()? * scale) / scale))
                }
            }
        }
        actual => Err(LispError::arity("1 or 2", actual)),
    }
}

/// Rounds `n` to a multiple of `10^-digits`, half to even. Non-negative
/// digit counts leave an integer unchanged.
fn round_integer(n: i64, digits: i64) -> LispResult<i64> {
    if digits >= 0 {
        return Ok(n);
    }
    // Every i64 is under half of 10^20.
    let scale = match u32::try_from(digits.unsigned_abs()) {
        Ok(power @ 0..=19) => 10i128.pow(power),
        _ => return Ok(0),
    };
    let (quotient, remainder) = (i128::from(n).div_euclid(scale), i128::from(n).rem_euclid(scale));
    let quotient = match (2 * remainder).cmp(&scale) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal => quotient + (quotient & 1),
    };
    i64::try_from(quotient * scale)
        .map_err(|_| LispError::value("a result within the integer range", Expression::Integer(n)))
}

fn fn_display(args: Vec<Expression>, interpreter: &Interpreter) -> ExprResult {
    let [x] = args.take::<1>()?;
    match x {
        Expression::String(s) => interpreter.write_output(&s)?,
        other => interpreter.write_output(&other.to_string())?,
    }
    Ok(Expression::Void)
}

fn fn_newline(args: Vec<Expression>, interpreter: &Interpreter) -> ExprResult {
    let [] = args.take::<0>()?;
    interpreter.write_output("\n")?;
    Ok(Expression::Void)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io, rc::Rc};

    use super::*;
    use crate::{interpreter::Config, lisp_macro::lisp};

    /// Output sink shared with the test so printed text can be inspected.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> ExprResult {
        Interpreter::with_output(Config::default(), Box::new(io::sink())).run(source)
    }

    fn int(x: i64) -> Expression {
        Expression::Integer(x)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("(+)").unwrap(), int(0));
        assert_eq!(run("(+ 1 2 3)").unwrap(), int(6));
        assert_eq!(run("(* 2 3 4)").unwrap(), int(24));
        assert_eq!(run("(- 10 1 2)").unwrap(), int(7));
        assert_eq!(run("(- 5)").unwrap(), int(-5));
        assert_eq!(run("(/ 1 2)").unwrap(), Expression::Float(0.5));
        assert_eq!(run("(/ 4)").unwrap(), Expression::Float(0.25));
        assert_eq!(run("(+ 1 2.5)").unwrap(), Expression::Float(3.5));
        assert!(matches!(run("(/ 1 0)"), Err(LispError::ValueError { .. })));
        assert!(matches!(run("(-)"), Err(LispError::ArityError { .. })));
        assert!(matches!(
            run("(+ 1 \"two\")"),
            Err(LispError::TypeError { expected_type: "number", .. })
        ));
    }

    #[test]
    fn test_complex_arithmetic() {
        assert_eq!(run("(* 2i 2i)").unwrap().to_string(), "-4.0+0.0i");
        assert_eq!(run("(abs 3+4i)").unwrap(), Expression::Float(5.0));
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(
            run("(append (list 1 2) (list 3) (quote ()))").unwrap(),
            lisp! { (1 2 3) }
        );
        assert_eq!(
            run("(+ \"foo\" \"bar\")").unwrap(),
            Expression::string("foobar")
        );
        assert!(matches!(run("(+ (list 1) 2)"), Err(LispError::TypeError { .. })));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("(< 1 2 3)").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(< 1 3 2)").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(>= 3 3 1.5)").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(= 1 1.0)").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(= 1 2)").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(< \"abc\" \"abd\")").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(> nan 1)").unwrap(), Expression::Boolean(false));
        assert!(matches!(run("(< 1 (quote a))"), Err(LispError::TypeError { .. })));
        assert!(matches!(run("(< 1i 2)"), Err(LispError::TypeError { .. })));
    }

    #[test]
    fn test_list_operations() {
        assert_eq!(run("(car (list 1 2 3))").unwrap(), int(1));
        assert_eq!(run("(cdr (list 1 2 3))").unwrap(), lisp! { (2 3) });
        assert_eq!(run("(cdr (quote ()))").unwrap(), Expression::nil());
        assert_eq!(run("(cons 0 (list 1))").unwrap(), lisp! { (0 1) });
        assert_eq!(run("(length (list 1 2 3))").unwrap(), int(3));
        assert_eq!(run("(length \"héllo\")").unwrap(), int(5));
        assert_eq!(run("(null? (quote ()))").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(null? (list 1))").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(list? (list))").unwrap(), Expression::Boolean(true));
        assert!(matches!(
            run("(car (quote ()))"),
            Err(LispError::TypeError { expected_type: "non-empty list", .. })
        ));
        assert!(matches!(run("(cons 1 2)"), Err(LispError::TypeError { .. })));
    }

    #[test]
    fn test_equality() {
        assert_eq!(
            run("(define l (list 1 2)) (eq? l l)").unwrap(),
            Expression::Boolean(true)
        );
        assert_eq!(run("(eq? (list 1) (list 1))").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(equal? (list 1) (list 1))").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(eq? (quote a) (quote a))").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(equal? 1 1.0)").unwrap(), Expression::Boolean(false));
    }

    #[test]
    fn test_higher_order() {
        assert_eq!(
            run("(map (lambda (x) (* x x)) (list 1 2 3))").unwrap(),
            lisp! { (1 4 9) }
        );
        assert_eq!(run("(map + (list 1 2 3) (list 10 20))").unwrap(), lisp! { (11 22) });
        assert_eq!(run("(apply + (list 1 2 3))").unwrap(), int(6));
        assert_eq!(run("(procedure? car)").unwrap(), Expression::Boolean(true));
        assert_eq!(
            run("(procedure? (lambda (x) x))").unwrap(),
            Expression::Boolean(true)
        );
        assert_eq!(run("(procedure? 1)").unwrap(), Expression::Boolean(false));
        assert!(matches!(run("(map car)"), Err(LispError::ArityError { .. })));
    }

    #[test]
    fn test_begin_evaluates_every_argument() {
        assert_eq!(
            run("(define x 1) (begin (set! x 2) (set! x (* x 10)) x)").unwrap(),
            int(20)
        );
        assert!(matches!(run("(begin)"), Err(LispError::ArityError { .. })));
    }

    #[test]
    fn test_extremum_and_round() {
        assert_eq!(run("(max 1 5 3)").unwrap(), int(5));
        assert_eq!(run("(min 1 0.5 3)").unwrap(), Expression::Float(0.5));
        assert_eq!(run("(max (list 4 8 2))").unwrap(), int(8));
        assert!(matches!(run("(max (list))"), Err(LispError::ValueError { .. })));
        assert_eq!(run("(round 2.5)").unwrap(), int(2));
        assert_eq!(run("(round 3.5)").unwrap(), int(4));
        assert_eq!(run("(round -2.7)").unwrap(), int(-3));
        assert_eq!(run("(round 2.25 1)").unwrap(), Expression::Float(2.2));
        assert_eq!(run("(round 7 2)").unwrap(), int(7));
        assert_eq!(run("(round 1234 -2)").unwrap(), int(1200));
        assert_eq!(run("(round 1250 -2)").unwrap(), int(1200));
        assert_eq!(run("(round 1350 -2)").unwrap(), int(1400));
        assert_eq!(run("(round -1250 -2)").unwrap(), int(-1200));
        assert_eq!(run("(round -1251 -2)").unwrap(), int(-1300));
        assert_eq!(run("(round 5 -1)").unwrap(), int(0));
        assert_eq!(run("(round 15 -1)").unwrap(), int(20));
        assert_eq!(run("(round 123 -25)").unwrap(), int(0));
        assert!(matches!(
            run("(round 9000000000000000000 -19)"),
            Err(LispError::ValueError { .. })
        ));
        assert_eq!(run("(abs -3)").unwrap(), int(3));
    }

    #[test]
    fn test_predicates() {
        assert_eq!(run("(not #f)").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(not 0)").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(number? 1.5)").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(number? \"1\")").unwrap(), Expression::Boolean(false));
        assert_eq!(run("(symbol? (quote x))").unwrap(), Expression::Boolean(true));
        assert_eq!(run("(symbol? \"x\")").unwrap(), Expression::Boolean(false));
    }

    #[test]
    fn test_display_output() {
        let buffer = SharedBuffer::default();
        let interpreter = Interpreter::with_output(Config::default(), Box::new(buffer.clone()));
        let value = interpreter
            .run("(display \"Hello\") (newline) (display (list 1 \"a\" #t)) (newline)")
            .unwrap();
        assert_eq!(value, Expression::Void);
        assert_eq!(
            String::from_utf8(buffer.0.borrow().clone()).unwrap(),
            "Hello\n(1 \"a\" #t)\n"
        );
    }

    #[test]
    fn test_arguments_evaluated_left_to_right() {
        let buffer = SharedBuffer::default();
        let interpreter = Interpreter::with_output(Config::default(), Box::new(buffer.clone()));
        interpreter
            .run("(list (display 1) (display 2) (display 3))")
            .unwrap();
        assert_eq!(String::from_utf8(buffer.0.borrow().clone()).unwrap(), "123");
    }
}
