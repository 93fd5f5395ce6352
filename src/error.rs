use thiserror::Error;

use crate::syntax::Expression;

pub type LispResult<T> = Result<T, LispError>;

#[derive(Error, Debug)]
pub enum LispError {
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("unbound variable: `{0}` is not defined")]
    UnboundVariable(String),
    #[error("arity error: procedure expected {expected} arguments but was given {actual}")]
    ArityError { expected: String, actual: usize },
    #[error("type error: expected {expected_type}, got {value} of type {actual_type}")]
    TypeError {
        expected_type: &'static str,
        actual_type: &'static str,
        value: Expression,
    },
    #[error("value error: expected {expected}, got {actual}")]
    ValueError { expected: String, actual: Expression },
    #[error("recursion error: maximum evaluation depth of {0} exceeded")]
    RecursionError(usize),
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

impl LispError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::SyntaxError(message.into())
    }

    pub fn arity(expected: impl ToString, actual: usize) -> Self {
        Self::ArityError {
            expected: expected.to_string(),
            actual,
        }
    }

    pub fn value(expected: impl Into<String>, actual: Expression) -> Self {
        Self::ValueError {
            expected: expected.into(),
            actual,
        }
    }
}

impl Expression {
    pub fn type_name(&self) -> &'static str {
        match self {
            Expression::Void => "void",
            Expression::Boolean(_) => "boolean",
            Expression::Integer(_) => "integer",
            Expression::Float(_) => "float",
            Expression::Complex(_) => "complex",
            Expression::String(_) => "string",
            Expression::Symbol(_) => "symbol",
            Expression::List(_) => "list",
            Expression::Procedure(_) => "procedure",
        }
    }

    pub fn type_error(self, expected_type: &'static str) -> LispError {
        LispError::TypeError {
            expected_type,
            actual_type: self.type_name(),
            value: self,
        }
    }
}

/// Destructures an evaluated argument list of a fixed length.
pub trait Args {
    fn take<const N: usize>(self) -> LispResult<[Expression; N]>;
}

impl Args for Vec<Expression> {
    fn take<const N: usize>(self) -> LispResult<[Expression; N]> {
        let actual = self.len();
        self.try_into().map_err(|_| LispError::arity(N, actual))
    }
}
