//! Builds expression trees from Rust tokens, for tests.
//!
//! `lisp! { (define fact (lambda (n) (* n 2))) }` gives the same tree the
//! reader produces for that text. Literals go through the reader's own atom
//! conversion; names that are not single Rust tokens (`set!`,
//! `unquote-splicing`) have to be built with `Expression::symbol`.

macro_rules! expression {
    ( ( $( $contents:tt )* ) ) => {{
        let items: Vec<$crate::syntax::Expression> =
            vec![$( $crate::lisp_macro::expression!($contents) ),*];
        $crate::syntax::Expression::list(items)
    }};
    ( - ) => {
        $crate::syntax::Expression::symbol("-")
    };
    ( $lit:literal ) => {
        $crate::parser::atom(stringify!($lit)).expect("literal is a valid atom")
    };
    ( $name:tt ) => {
        $crate::syntax::Expression::symbol(stringify!($name))
    };
}

macro_rules! lisp {
    ( $tt:tt ) => {
        $crate::lisp_macro::expression!($tt)
    };
}

pub(crate) use {expression, lisp};

#[test]
fn test_matches_reader() {
    use crate::parser::parse;

    let expected = parse("(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))")
        .unwrap()
        .unwrap();
    assert_eq!(
        lisp! { (define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1)))))) },
        expected
    );
    assert_eq!(
        lisp! { (display "hi" 2.5 ()) },
        parse(r#"(display "hi" 2.5 ())"#).unwrap().unwrap()
    );
}
