//! A small Scheme interpreter.
//!
//! Source text is read into [`Expression`] trees and evaluated against a
//! chain of [`Context`] frames rooted at the interpreter's global
//! environment.
//!
//! ```
//! use lispy::{Expression, Interpreter};
//!
//! let interpreter = Interpreter::new();
//! let value = interpreter
//!     .run("(define square (lambda (x) (* x x))) (square 12)")
//!     .unwrap();
//! assert_eq!(value, Expression::Integer(144));
//! ```

pub mod error;
pub mod functions;
pub mod interpreter;
#[cfg(test)]
mod lisp_macro;
pub mod number;
pub mod parser;
pub mod repl;
pub mod syntax;

pub use error::{LispError, LispResult};
pub use interpreter::{Config, Context, ContextRef, Interpreter};
pub use parser::{parse, parse_all, read, tokens::InPort};
pub use syntax::Expression;

#[cfg(test)]
mod round_trip {
    use proptest::prelude::*;

    use crate::{
        parser::{atom, parse},
        syntax::Expression,
    };

    fn symbol() -> impl Strategy<Value = Expression> {
        "[a-z!?*<>=+-][a-z0-9!?*<>=+-]{0,8}".prop_filter_map("reads as a symbol", |name| {
            match atom(&name) {
                Ok(expr @ Expression::Symbol(_)) => Some(expr),
                _ => None,
            }
        })
    }

    fn datum() -> impl Strategy<Value = Expression> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Expression::Integer),
            any::<bool>().prop_map(Expression::Boolean),
            "[ -~\n\t]{0,12}".prop_map(|s| Expression::string(&s)),
            symbol(),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(Expression::list)
        })
    }

    proptest! {
        #[test]
        fn printed_data_read_back(expr in datum()) {
            let printed = expr.to_string();
            prop_assert_eq!(parse(&printed).unwrap(), Some(expr), "{}", printed);
        }

        #[test]
        fn finite_floats_read_back(x in any::<f64>().prop_filter("finite", |x| x.is_finite())) {
            let printed = Expression::Float(x).to_string();
            prop_assert_eq!(parse(&printed).unwrap(), Some(Expression::Float(x)));
        }
    }
}
