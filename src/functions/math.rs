//! Floating-point library bound into the global environment: constants plus
//! the usual real-valued functions. Complex arguments are rejected.

use std::{collections::HashMap, f64::consts};

use lazy_static::lazy_static;
use literally::hmap;

use super::BaseFunction;
use crate::{
    error::{Args, LispError, LispResult},
    interpreter::{ExprResult, Interpreter},
    number::{float_to_integer, Number},
    syntax::Expression,
};

pub const CONSTANTS: [(&str, f64); 5] = [
    ("pi", consts::PI),
    ("e", consts::E),
    ("tau", consts::TAU),
    ("inf", f64::INFINITY),
    ("nan", f64::NAN),
];

fn real(x: Expression) -> LispResult<f64> {
    Number::try_from(x)?.to_f64()
}

fn domain_error(x: f64) -> LispError {
    LispError::value("math domain error", Expression::Float(x))
}

/// A NaN produced from non-NaN input means the argument was outside the domain.
fn checked(inputs: &[f64], result: f64) -> ExprResult {
    if result.is_nan() && inputs.iter().all(|x| !x.is_nan()) {
        Err(domain_error(inputs[0]))
    } else {
        Ok(Expression::Float(result))
    }
}

macro_rules! unary {
    ( $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x] = args.take::<1>()?;
            let x = real(x)?;
            checked(&[x], $f(x))
        }) as BaseFunction
    };
    // Arguments outside `$domain` fail even where the float result is an infinity.
    ( $f:expr, $domain:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x] = args.take::<1>()?;
            let x = real(x)?;
            if !$domain(x) {
                return Err(domain_error(x));
            }
            checked(&[x], $f(x))
        }) as BaseFunction
    };
}

macro_rules! binary {
    ( $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x, y] = args.take::<2>()?;
            let (x, y) = (real(x)?, real(y)?);
            checked(&[x, y], $f(x, y))
        }) as BaseFunction
    };
}

macro_rules! integral {
    ( $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x] = args.take::<1>()?;
            match Number::try_from(x)? {
                Number::Integer(n) => Ok(Expression::Integer(n)),
                n => float_to_integer($f(n.to_f64()?)).map(Expression::Integer),
            }
        }) as BaseFunction
    };
}

macro_rules! classify {
    ( $f:expr ) => {
        (|args: Vec<Expression>, _: &Interpreter| -> ExprResult {
            let [x] = args.take::<1>()?;
            Ok(Expression::Boolean($f(real(x)?)))
        }) as BaseFunction
    };
}

lazy_static! {
    pub static ref FUNCTIONS: HashMap<&'static str, BaseFunction> = hmap! {
        "acos" => unary!(f64::acos),
        "acosh" => unary!(f64::acosh),
        "asin" => unary!(f64::asin),
        "asinh" => unary!(f64::asinh),
        "atan" => unary!(f64::atan),
        "atan2" => binary!(f64::atan2),
        "atanh" => unary!(f64::atanh, |x: f64| x.abs() < 1.0),
        "ceil" => integral!(f64::ceil),
        "copysign" => binary!(f64::copysign),
        "cos" => unary!(f64::cos),
        "cosh" => unary!(f64::cosh),
        "degrees" => unary!(f64::to_degrees),
        "exp" => unary!(f64::exp),
        "expm1" => unary!(f64::exp_m1),
        "fabs" => unary!(f64::abs),
        "factorial" => fn_factorial as BaseFunction,
        "floor" => integral!(f64::floor),
        "fmod" => binary!(|x: f64, y: f64| x % y),
        "fsum" => fn_fsum as BaseFunction,
        "gcd" => fn_gcd as BaseFunction,
        "hypot" => binary!(f64::hypot),
        "isfinite" => classify!(f64::is_finite),
        "isinf" => classify!(f64::is_infinite),
        "isnan" => classify!(f64::is_nan),
        "ldexp" => fn_ldexp as BaseFunction,
        "log" => fn_log as BaseFunction,
        "log10" => unary!(f64::log10, |x: f64| x > 0.0),
        "log1p" => unary!(f64::ln_1p, |x: f64| x > -1.0),
        "log2" => unary!(f64::log2, |x: f64| x > 0.0),
        "pow" => binary!(f64::powf),
        "radians" => unary!(f64::to_radians),
        "sin" => unary!(f64::sin),
        "sinh" => unary!(f64::sinh),
        "sqrt" => unary!(f64::sqrt),
        "tan" => unary!(f64::tan),
        "tanh" => unary!(f64::tanh),
        "trunc" => integral!(f64::trunc),
    };
}

/// `(log x)` is the natural logarithm, `(log x base)` divides by `ln base`.
fn fn_log(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let (x, base) = match args.len() {
        1 => {
            let [x] = args.take::<1>()?;
            (real(x)?, None)
        }
        2 => {
            let [x, base] = args.take::<2>()?;
            (real(x)?, Some(real(base)?))
        }
        actual => return Err(LispError::arity("1 or 2", actual)),
    };
    if x <= 0.0 {
        return Err(domain_error(x));
    }
    match base {
        None => checked(&[x], x.ln()),
        Some(base) if base <= 0.0 || base == 1.0 => Err(domain_error(base)),
        Some(base) => checked(&[x, base], x.ln() / base.ln()),
    }
}

fn fn_ldexp(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [x, exponent] = args.take::<2>()?;
    let x = real(x)?;
    let exponent = exponent.into_integer()?.clamp(i32::MIN.into(), i32::MAX.into()) as i32;
    Ok(Expression::Float(x * 2f64.powi(exponent)))
}

fn fn_factorial(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [n] = args.take::<1>()?;
    let n = n.into_integer()?;
    if n < 0 {
        return Err(LispError::value("a non-negative integer", Expression::Integer(n)));
    }
    (2..=n)
        .try_fold(1i64, |product, k| product.checked_mul(k))
        .map(Expression::Integer)
        .ok_or_else(|| LispError::value("a result within the integer range", Expression::Integer(n)))
}

/// Greatest common divisor of any number of integers; `(gcd)` is 0.
fn fn_gcd(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let mut divisor = 0u64;
    for arg in args {
        let mut n = arg.into_integer()?.unsigned_abs();
        while n != 0 {
            (divisor, n) = (n, divisor % n);
        }
    }
    i64::try_from(divisor)
        .map(Expression::Integer)
        .map_err(|_| LispError::value("a result within the integer range", Expression::Float(divisor as f64)))
}

/// Compensated sum of a list of numbers.
fn fn_fsum(args: Vec<Expression>, _interpreter: &Interpreter) -> ExprResult {
    let [list] = args.take::<1>()?;
    let (mut sum, mut compensation) = (0.0f64, 0.0f64);
    for item in list.into_list()?.iter() {
        let x = real(item.clone())?;
        let total = sum + x;
        compensation += if sum.abs() >= x.abs() {
            (sum - total) + x
        } else {
            (x - total) + sum
        };
        sum = total;
    }
    Ok(Expression::Float(sum + compensation))
}
