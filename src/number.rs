use std::cmp::Ordering;

use num_complex::Complex64;

use crate::{
    error::{LispError, LispResult},
    syntax::Expression,
};

/// The numeric tower: integers widen to floats, floats widen to complex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
    Complex(Complex64),
}

/// Two operands converted to a common representation.
enum Pair {
    Integers(i64, i64),
    Floats(f64, f64),
    Complexes(Complex64, Complex64),
}

impl TryFrom<Expression> for Number {
    type Error = LispError;

    fn try_from(value: Expression) -> LispResult<Self> {
        match value {
            Expression::Integer(x) => Ok(Number::Integer(x)),
            Expression::Float(x) => Ok(Number::Float(x)),
            Expression::Complex(z) => Ok(Number::Complex(z)),
            other => Err(other.type_error("number")),
        }
    }
}

impl From<Number> for Expression {
    fn from(value: Number) -> Self {
        match value {
            Number::Integer(x) => Expression::Integer(x),
            Number::Float(x) => Expression::Float(x),
            Number::Complex(z) => Expression::Complex(z),
        }
    }
}

fn overflow(operand: Number) -> LispError {
    LispError::value("a result within the integer range", operand.into())
}

/// Converts an integral float to an integer. NaN, infinities and values
/// outside the `i64` range are rejected.
pub fn float_to_integer(x: f64) -> LispResult<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if x.is_finite() && (-LIMIT..LIMIT).contains(&x) {
        Ok(x as i64)
    } else {
        Err(LispError::value("a finite number within the integer range", Expression::Float(x)))
    }
}

impl Number {
    fn to_complex(self) -> Complex64 {
        match self {
            Number::Integer(x) => Complex64::new(x as f64, 0.0),
            Number::Float(x) => Complex64::new(x, 0.0),
            Number::Complex(z) => z,
        }
    }

    /// Real part as a float; callers have already ruled out complex values.
    fn real_part(self) -> f64 {
        match self {
            Number::Integer(x) => x as f64,
            Number::Float(x) => x,
            Number::Complex(z) => z.re,
        }
    }

    fn pair(self, other: Number) -> Pair {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Pair::Integers(a, b),
            (Number::Complex(_), _) | (_, Number::Complex(_)) => {
                Pair::Complexes(self.to_complex(), other.to_complex())
            }
            _ => Pair::Floats(self.real_part(), other.real_part()),
        }
    }

    pub fn to_f64(self) -> LispResult<f64> {
        match self {
            Number::Complex(_) => Err(Expression::from(self).type_error("real number")),
            real => Ok(real.real_part()),
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Integer(x) => x == 0,
            Number::Float(x) => x == 0.0,
            Number::Complex(z) => z.re == 0.0 && z.im == 0.0,
        }
    }

    pub fn add(self, other: Number) -> LispResult<Number> {
        match self.pair(other) {
            Pair::Integers(a, b) => a.checked_add(b).map(Number::Integer).ok_or_else(|| overflow(self)),
            Pair::Floats(a, b) => Ok(Number::Float(a + b)),
            Pair::Complexes(a, b) => Ok(Number::Complex(a + b)),
        }
    }

    pub fn sub(self, other: Number) -> LispResult<Number> {
        match self.pair(other) {
            Pair::Integers(a, b) => a.checked_sub(b).map(Number::Integer).ok_or_else(|| overflow(self)),
            Pair::Floats(a, b) => Ok(Number::Float(a - b)),
            Pair::Complexes(a, b) => Ok(Number::Complex(a - b)),
        }
    }

    pub fn mul(self, other: Number) -> LispResult<Number> {
        match self.pair(other) {
            Pair::Integers(a, b) => a.checked_mul(b).map(Number::Integer).ok_or_else(|| overflow(self)),
            Pair::Floats(a, b) => Ok(Number::Float(a * b)),
            Pair::Complexes(a, b) => Ok(Number::Complex(a * b)),
        }
    }

    /// True division: two integers give a float.
    pub fn div(self, other: Number) -> LispResult<Number> {
        if other.is_zero() {
            return Err(LispError::value("a non-zero divisor", other.into()));
        }
        match self.pair(other) {
            Pair::Integers(a, b) => Ok(Number::Float(a as f64 / b as f64)),
            Pair::Floats(a, b) => Ok(Number::Float(a / b)),
            Pair::Complexes(a, b) => Ok(Number::Complex(a / b)),
        }
    }

    pub fn neg(self) -> LispResult<Number> {
        match self {
            Number::Integer(x) => x.checked_neg().map(Number::Integer).ok_or_else(|| overflow(self)),
            Number::Float(x) => Ok(Number::Float(-x)),
            Number::Complex(z) => Ok(Number::Complex(-z)),
        }
    }

    pub fn abs(self) -> LispResult<Number> {
        match self {
            Number::Integer(x) => x.checked_abs().map(Number::Integer).ok_or_else(|| overflow(self)),
            Number::Float(x) => Ok(Number::Float(x.abs())),
            Number::Complex(z) => Ok(Number::Float(z.norm())),
        }
    }

    /// Numeric equality across representations: `(= 1 1.0)` holds.
    pub fn num_eq(self, other: Number) -> bool {
        match self.pair(other) {
            Pair::Integers(a, b) => a == b,
            Pair::Floats(a, b) => a == b,
            Pair::Complexes(a, b) => a == b,
        }
    }

    /// Ordering of two real numbers; `None` when either is NaN.
    pub fn compare(self, other: Number) -> LispResult<Option<Ordering>> {
        match self.pair(other) {
            Pair::Integers(a, b) => Ok(Some(a.cmp(&b))),
            Pair::Floats(a, b) => Ok(a.partial_cmp(&b)),
            Pair::Complexes(..) => {
                let complex = if matches!(self, Number::Complex(_)) { self } else { other };
                Err(Expression::from(complex).type_error("real number"))
            }
        }
    }
}

#[test]
fn test_promotion() {
    let two = Number::Integer(2);
    assert_eq!(two.add(Number::Integer(3)).unwrap(), Number::Integer(5));
    assert_eq!(two.mul(Number::Float(1.5)).unwrap(), Number::Float(3.0));
    assert_eq!(
        two.sub(Number::Complex(Complex64::new(0.0, 1.0))).unwrap(),
        Number::Complex(Complex64::new(2.0, -1.0))
    );
    assert_eq!(Number::Integer(7).div(two).unwrap(), Number::Float(3.5));
}

#[test]
fn test_checked_integers() {
    let max = Number::Integer(i64::MAX);
    assert!(matches!(max.add(Number::Integer(1)), Err(LispError::ValueError { .. })));
    assert!(matches!(Number::Integer(i64::MIN).neg(), Err(LispError::ValueError { .. })));
    assert!(matches!(max.div(Number::Float(0.0)), Err(LispError::ValueError { .. })));
}

#[test]
fn test_comparison() {
    use std::cmp::Ordering::*;
    assert_eq!(Number::Integer(1).compare(Number::Float(1.5)).unwrap(), Some(Less));
    assert_eq!(Number::Float(f64::NAN).compare(Number::Integer(0)).unwrap(), None);
    assert!(Number::Integer(1).num_eq(Number::Float(1.0)));
    let i = Number::Complex(Complex64::new(0.0, 1.0));
    assert!(matches!(i.compare(Number::Integer(0)), Err(LispError::TypeError { .. })));
    assert_eq!(i.abs().unwrap(), Number::Float(1.0));
}

#[test]
fn test_float_to_integer() {
    assert_eq!(float_to_integer(-3.0).unwrap(), -3);
    assert!(float_to_integer(f64::NAN).is_err());
    assert!(float_to_integer(f64::INFINITY).is_err());
    assert!(float_to_integer(1e19).is_err());
}
