use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io::{self, Write},
    rc::Rc,
};

use enum_map::{enum_map, EnumMap};
use lazy_static::lazy_static;
use tracing::{debug, trace, warn};

use crate::{
    error::{LispError, LispResult},
    functions,
    parser::{read, tokens::InPort},
    syntax::{Closure, Expression, Parameters, Procedure, SpecialForm, Symbol},
};

pub type ExprResult = LispResult<Expression>;
pub type ContextRef = Rc<Context>;

/// One frame of bindings, linked to the frame it was created in.
pub struct Context {
    names: RefCell<HashMap<Symbol, Expression>>,
    parent: Option<ContextRef>,
}

impl Context {
    /// An empty outermost frame.
    pub fn new() -> ContextRef {
        Rc::new(Self {
            names: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    /// A frame binding `params` to `args` positionally, enclosed by `parent`.
    pub fn with_bindings(
        params: &Parameters,
        args: Vec<Expression>,
        parent: ContextRef,
    ) -> LispResult<ContextRef> {
        let names = match params {
            Parameters::Fixed(params) => {
                if params.len() != args.len() {
                    return Err(LispError::arity(params.len(), args.len()));
                }
                params.iter().copied().zip(args).collect()
            }
            Parameters::Variadic(rest) => HashMap::from([(*rest, Expression::list(args))]),
        };
        Ok(Rc::new(Self {
            names: RefCell::new(names),
            parent: Some(parent),
        }))
    }

    /// The innermost frame, starting from this one, that binds `name`.
    pub fn find(self: &Rc<Self>, name: Symbol) -> LispResult<ContextRef> {
        let mut context = self;
        loop {
            if context.names.borrow().contains_key(&name) {
                return Ok(context.clone());
            }
            match &context.parent {
                Some(parent) => context = parent,
                None => return Err(LispError::UnboundVariable(name.to_string())),
            }
        }
    }

    pub fn get(self: &Rc<Self>, name: Symbol) -> ExprResult {
        let context = self.find(name)?;
        let value = context.names.borrow().get(&name).cloned();
        value.ok_or_else(|| LispError::UnboundVariable(name.to_string()))
    }

    /// Binds `name` in this frame, shadowing any outer binding.
    pub fn define(&self, name: Symbol, value: Expression) {
        self.names.borrow_mut().insert(name, value);
    }

    /// Rebinds `name` in whichever frame already holds it.
    pub fn set(self: &Rc<Self>, name: Symbol, value: Expression) -> LispResult<()> {
        self.find(name)?.define(name, value);
        Ok(())
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.names.borrow().contains_key(&name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Deepest nesting of `eval` calls before evaluation fails with a
    /// recursion error. `None` lets recursion run until the host stack does.
    pub max_depth: Option<usize>,
}

impl Config {
    pub const DEFAULT_MAX_DEPTH: usize = 1000;
    pub const MAX_DEPTH_VAR: &'static str = "LISPY_MAX_DEPTH";

    /// Defaults, overridden by `LISPY_MAX_DEPTH` (`0` or `none` for no limit).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(Self::MAX_DEPTH_VAR) {
            match parse_max_depth(&value) {
                Some(max_depth) => config.max_depth = max_depth,
                None => warn!(%value, "ignoring invalid {}", Self::MAX_DEPTH_VAR),
            }
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: Some(Self::DEFAULT_MAX_DEPTH),
        }
    }
}

/// Parses a depth limit where `0` and `none` mean unlimited.
pub fn parse_max_depth(value: &str) -> Option<Option<usize>> {
    match value.trim() {
        "none" | "0" => Some(None),
        depth => depth.parse().ok().map(Some),
    }
}

type SpecialFormFn = fn(&Interpreter, &[Expression], &ContextRef) -> ExprResult;

lazy_static! {
    static ref SPECIAL_FORMS: EnumMap<SpecialForm, SpecialFormFn> = enum_map! {
        SpecialForm::Quote => form_quote as SpecialFormFn,
        SpecialForm::If => form_if as SpecialFormFn,
        SpecialForm::Define => form_define as SpecialFormFn,
        SpecialForm::Set => form_set as SpecialFormFn,
        SpecialForm::Lambda => form_lambda as SpecialFormFn,
    };
}

/// Checks the operand count of a special form.
fn operands<const N: usize>(form: SpecialForm, args: &[Expression]) -> LispResult<&[Expression; N]> {
    args.try_into().map_err(|_| {
        LispError::syntax(format!(
            "`{}` takes {} operands, got {}",
            SpecialForm::TEXT[form],
            N,
            args.len()
        ))
    })
}

fn form_quote(_interpreter: &Interpreter, args: &[Expression], _context: &ContextRef) -> ExprResult {
    let [expr] = operands::<1>(SpecialForm::Quote, args)?;
    Ok(expr.clone())
}

fn form_if(interpreter: &Interpreter, args: &[Expression], context: &ContextRef) -> ExprResult {
    let [test, conseq, alt] = operands::<3>(SpecialForm::If, args)?;
    if interpreter.eval(test, context)?.truthy() {
        interpreter.eval(conseq, context)
    } else {
        interpreter.eval(alt, context)
    }
}

fn form_define(interpreter: &Interpreter, args: &[Expression], context: &ContextRef) -> ExprResult {
    let [name, expr] = operands::<2>(SpecialForm::Define, args)?;
    let name = name.clone().into_symbol()?;
    let value = interpreter.eval(expr, context)?;
    debug!(%name, %value, "define");
    context.define(name, value);
    Ok(Expression::Void)
}

fn form_set(interpreter: &Interpreter, args: &[Expression], context: &ContextRef) -> ExprResult {
    let [name, expr] = operands::<2>(SpecialForm::Set, args)?;
    let name = name.clone().into_symbol()?;
    let value = interpreter.eval(expr, context)?;
    debug!(%name, %value, "set!");
    context.set(name, value)?;
    Ok(Expression::Void)
}

fn form_lambda(_interpreter: &Interpreter, args: &[Expression], context: &ContextRef) -> ExprResult {
    let [params, body] = operands::<2>(SpecialForm::Lambda, args)?;
    let params = match params {
        Expression::Symbol(rest) => Parameters::Variadic(*rest),
        Expression::List(names) => Parameters::Fixed(
            names
                .iter()
                .cloned()
                .map(Expression::into_symbol)
                .collect::<Result<_, _>>()?,
        ),
        other => return Err(other.clone().type_error("parameter list")),
    };
    debug!(?params, "lambda");
    Ok(Procedure::Closure(Closure {
        params,
        body: body.clone(),
        context: context.clone(),
    })
    .into())
}

/// Decrements the evaluation depth when an `eval` call returns.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// An interpreter session: a global environment plus the output that
/// `display` and `newline` write to.
pub struct Interpreter {
    global: ContextRef,
    config: Config,
    depth: Cell<usize>,
    output: RefCell<Box<dyn Write>>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: Config, output: Box<dyn Write>) -> Self {
        let global = Context::new();
        functions::install(&global);
        Self {
            global,
            config,
            depth: Cell::new(0),
            output: RefCell::new(output),
        }
    }

    pub fn global(&self) -> &ContextRef {
        &self.global
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn write_output(&self, text: &str) -> LispResult<()> {
        let mut output = self.output.borrow_mut();
        output.write_all(text.as_bytes())?;
        output.flush()?;
        Ok(())
    }

    fn descend(&self) -> LispResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if let Some(max_depth) = self.config.max_depth {
            if depth > max_depth {
                warn!(max_depth, "evaluation depth limit reached");
                return Err(LispError::RecursionError(max_depth));
            }
        }
        self.depth.set(depth);
        Ok(DepthGuard { depth: &self.depth })
    }

    /// Evaluates `expr` in `context`.
    pub fn eval(&self, expr: &Expression, context: &ContextRef) -> ExprResult {
        let _guard = self.descend()?;
        match expr {
            Expression::Symbol(name) => context.get(*name),
            Expression::List(items) => {
                let Some((operator, operands)) = items.split_first() else {
                    return Ok(expr.clone());
                };
                if let Some(form) = operator.as_symbol().and_then(SpecialForm::from_symbol) {
                    return SPECIAL_FORMS[form](self, operands, context);
                }
                let procedure = self.eval(operator, context)?;
                let args = operands
                    .iter()
                    .map(|operand| self.eval(operand, context))
                    .collect::<LispResult<Vec<_>>>()?;
                self.apply(&procedure, args)
            }
            atom => Ok(atom.clone()),
        }
    }

    /// Calls a procedure value with already evaluated arguments.
    pub fn apply(&self, procedure: &Expression, args: Vec<Expression>) -> ExprResult {
        let Expression::Procedure(procedure) = procedure else {
            return Err(procedure.clone().type_error("procedure"));
        };
        trace!(%procedure, args = args.len(), "apply");
        match procedure.as_ref() {
            Procedure::Primitive { function, .. } => function(args, self),
            Procedure::Closure(closure) => {
                let context =
                    Context::with_bindings(&closure.params, args, closure.context.clone())?;
                self.eval(&closure.body, &context)
            }
        }
    }

    /// Evaluates every expression read from `port` in the global
    /// environment, returning the value of the last one.
    pub fn load<R: io::BufRead>(&self, port: &mut InPort<R>) -> ExprResult {
        let mut value = Expression::Void;
        while let Some(expr) = read(port)? {
            value = self.eval(&expr, &self.global)?;
        }
        Ok(value)
    }

    /// Evaluates all of `source` in the global environment.
    pub fn run(&self, source: &str) -> ExprResult {
        let mut port: InPort<&[u8]> = InPort::from(source);
        self.load(&mut port)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Expression {
    pub fn into_symbol(self) -> LispResult<Symbol> {
        match self {
            Self::Symbol(symbol) => Ok(symbol),
            e => Err(e.type_error("symbol")),
        }
    }

    pub fn into_list(self) -> LispResult<Rc<[Expression]>> {
        match self {
            Self::List(items) => Ok(items),
            e => Err(e.type_error("list")),
        }
    }

    pub fn into_integer(self) -> LispResult<i64> {
        match self {
            Self::Integer(x) => Ok(x),
            e => Err(e.type_error("integer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{lisp_macro::lisp, parser::parse};

    fn eval_str(source: &str, interpreter: &Interpreter) -> ExprResult {
        let expr = parse(source)?.expect("source holds an expression");
        interpreter.eval(&expr, interpreter.global())
    }

    fn quiet() -> Interpreter {
        Interpreter::with_output(Config::default(), Box::new(io::sink()))
    }

    #[test]
    fn test_self_evaluating() {
        let interpreter = quiet();
        let global = interpreter.global();
        for expr in [
            Expression::Integer(10),
            Expression::Float(1.5),
            Expression::Boolean(false),
            Expression::string("text"),
            Expression::nil(),
        ] {
            assert_eq!(interpreter.eval(&expr, global).unwrap(), expr);
        }
    }

    #[test]
    fn test_variable_lookup() {
        let interpreter = quiet();
        interpreter.global().define(Symbol::intern("foo"), Expression::Integer(10));
        assert_eq!(eval_str("foo", &interpreter).unwrap(), Expression::Integer(10));
        assert!(matches!(
            eval_str("undefined-thing", &interpreter),
            Err(LispError::UnboundVariable(name)) if name == "undefined-thing"
        ));
    }

    #[test]
    fn test_quote() {
        let interpreter = quiet();
        assert!(!interpreter.global().contains(Symbol::intern("r")));
        let quoted = lisp! { (quote (* pi (* r r))) };
        assert_eq!(
            interpreter.eval(&quoted, interpreter.global()).unwrap(),
            lisp! { (* pi (* r r)) }
        );
        assert_eq!(
            eval_str("(quote (* 3 r))", &interpreter).unwrap().to_string(),
            "(* 3 r)"
        );
    }

    #[test]
    fn test_conditional() {
        let interpreter = quiet();
        assert_eq!(
            eval_str("(if (> 1 0) (+ 1 1) (- 1 1))", &interpreter).unwrap(),
            Expression::Integer(2)
        );
        assert_eq!(
            eval_str("(if (< 1 0) (+ 1 1) (- 1 1))", &interpreter).unwrap(),
            Expression::Integer(0)
        );
        // Only #f is false.
        assert_eq!(
            eval_str("(if (quote ()) 1 2)", &interpreter).unwrap(),
            Expression::Integer(1)
        );
        assert_eq!(eval_str("(if 0 1 2)", &interpreter).unwrap(), Expression::Integer(1));
        // The branch not taken is never evaluated.
        assert_eq!(
            eval_str("(if #t 1 unbound-name)", &interpreter).unwrap(),
            Expression::Integer(1)
        );
    }

    #[test]
    fn test_definition() {
        let interpreter = quiet();
        let foo = Symbol::intern("foo");
        assert!(!interpreter.global().contains(foo));
        assert_eq!(
            eval_str("(define foo (+ 1 2))", &interpreter).unwrap(),
            Expression::Void
        );
        assert_eq!(interpreter.global().get(foo).unwrap(), Expression::Integer(3));
    }

    #[test]
    fn test_full_example() {
        let interpreter = quiet();
        let global = interpreter.global();
        interpreter.eval(&lisp! { (define r 10) }, global).unwrap();
        assert_eq!(
            interpreter.eval(&lisp! { (* pi (* r r)) }, global).unwrap(),
            Expression::Float(314.1592653589793)
        );
    }

    #[test]
    fn test_set_requires_binding() {
        let interpreter = quiet();
        assert!(matches!(
            eval_str("(set! nothing 1)", &interpreter),
            Err(LispError::UnboundVariable(_))
        ));
        assert!(!interpreter.global().contains(Symbol::intern("nothing")));
        interpreter.run("(define x 1) (set! x 2)").unwrap();
        assert_eq!(eval_str("x", &interpreter).unwrap(), Expression::Integer(2));
    }

    #[test]
    fn test_define_shadows_and_set_reaches_outward() {
        let global = Context::new();
        let x = Symbol::intern("x");
        global.define(x, Expression::Integer(1));
        let inner = Context::with_bindings(&Parameters::Fixed(vec![]), vec![], global.clone()).unwrap();

        inner.set(x, Expression::Integer(2)).unwrap();
        assert!(!inner.contains(x));
        assert_eq!(global.get(x).unwrap(), Expression::Integer(2));

        inner.define(x, Expression::Integer(3));
        assert_eq!(inner.get(x).unwrap(), Expression::Integer(3));
        assert_eq!(global.get(x).unwrap(), Expression::Integer(2));
        assert!(Rc::ptr_eq(&inner.find(x).unwrap(), &inner));
    }

    #[test]
    fn test_circle_area() {
        let interpreter = quiet();
        interpreter
            .run("(define circle-area (lambda (r) (* pi (* r r))))")
            .unwrap();
        assert_eq!(
            eval_str("(circle-area 10)", &interpreter).unwrap(),
            Expression::Float(314.1592653589793)
        );
    }

    #[test]
    fn test_account_closure() {
        let interpreter = quiet();
        let program = "
            (begin
                (define make-account
                    (lambda (balance)
                        (lambda (amt)
                            (begin (set! balance (+ balance amt))
                                   balance))))
                (define account1 (make-account 100.00))
                (account1 -20.00))";
        assert_eq!(eval_str(program, &interpreter).unwrap(), Expression::Float(80.0));
        assert_eq!(
            eval_str("(account1 -20.00)", &interpreter).unwrap(),
            Expression::Float(60.0)
        );
        // A second account has its own balance.
        interpreter.run("(define account2 (make-account 5))").unwrap();
        assert_eq!(eval_str("(account2 1)", &interpreter).unwrap(), Expression::Integer(6));
        assert_eq!(eval_str("(account1 0)", &interpreter).unwrap(), Expression::Float(60.0));
    }

    #[test]
    fn test_recursive_factorial() {
        let interpreter = quiet();
        interpreter
            .run("(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))")
            .unwrap();
        assert_eq!(
            eval_str("(fact 10)", &interpreter).unwrap(),
            Expression::Integer(3628800)
        );
    }

    #[test]
    fn test_lexical_scope() {
        let interpreter = quiet();
        interpreter
            .run(
                "(define x 1)
                 (define get-x (lambda () x))
                 (define shadow (lambda (x) (get-x)))",
            )
            .unwrap();
        assert_eq!(eval_str("(shadow 99)", &interpreter).unwrap(), Expression::Integer(1));
    }

    #[test]
    fn test_variadic_lambda() {
        let interpreter = quiet();
        assert_eq!(
            eval_str("((lambda args args) 1 2 3)", &interpreter).unwrap(),
            lisp! { (1 2 3) }
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let interpreter = quiet();
        assert!(matches!(
            eval_str("((lambda (a b) a) 1)", &interpreter),
            Err(LispError::ArityError { actual: 1, .. })
        ));
    }

    #[test]
    fn test_malformed_special_forms() {
        let interpreter = quiet();
        for source in ["(if #t 1)", "(quote)", "(define x)", "(lambda (x))", "(set! x)"] {
            assert!(
                matches!(eval_str(source, &interpreter), Err(LispError::SyntaxError(_))),
                "{source}"
            );
        }
        assert!(matches!(
            eval_str("(define 1 2)", &interpreter),
            Err(LispError::TypeError { .. })
        ));
        assert!(matches!(
            eval_str("(lambda (x 1) x)", &interpreter),
            Err(LispError::TypeError { .. })
        ));
    }

    #[test]
    fn test_not_a_procedure() {
        let interpreter = quiet();
        assert!(matches!(
            eval_str("(1 2 3)", &interpreter),
            Err(LispError::TypeError { expected_type: "procedure", .. })
        ));
    }

    #[test]
    fn test_left_to_right_evaluation() {
        let interpreter = quiet();
        interpreter.run("(define trace (quote ()))").unwrap();
        interpreter
            .run(
                "(define note (lambda (x) (begin (set! trace (cons x trace)) x)))
                 (list (note 1) (note 2) (note 3))",
            )
            .unwrap();
        assert_eq!(eval_str("trace", &interpreter).unwrap(), lisp! { (3 2 1) });
    }

    #[test]
    fn test_evaluation_does_not_mutate_code() {
        let interpreter = quiet();
        let program = parse("(define y (quote (1 2)))").unwrap().unwrap();
        let before = program.clone();
        interpreter.eval(&program, interpreter.global()).unwrap();
        assert_eq!(program, before);
    }

    #[test]
    fn test_recursion_limit() {
        let interpreter =
            Interpreter::with_output(Config { max_depth: Some(50) }, Box::new(io::sink()));
        interpreter
            .run("(define loop (lambda (n) (+ 1 (loop n))))")
            .unwrap();
        assert!(matches!(
            eval_str("(loop 0)", &interpreter),
            Err(LispError::RecursionError(50))
        ));
        // The depth counter unwinds with the error.
        assert_eq!(interpreter.depth.get(), 0);
        assert_eq!(eval_str("(+ 1 2)", &interpreter).unwrap(), Expression::Integer(3));
    }

    #[test]
    fn test_sessions_are_independent() {
        let first = quiet();
        let second = quiet();
        first.run("(define only-here 1)").unwrap();
        assert!(matches!(
            eval_str("only-here", &second),
            Err(LispError::UnboundVariable(_))
        ));
    }

    #[test]
    fn test_parse_max_depth() {
        assert_eq!(parse_max_depth("250"), Some(Some(250)));
        assert_eq!(parse_max_depth("none"), Some(None));
        assert_eq!(parse_max_depth("0"), Some(None));
        assert_eq!(parse_max_depth("deep"), None);
    }
}
