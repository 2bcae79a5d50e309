//! Text syntax for expressions.
//!
//! ```text
//! $a + $b * 2        field selectors and arithmetic
//! $user.name         nested get
//! $[$key]            get with a dynamic key
//! !$done || $n >= 3  boolean and comparison operators
//! $n > 0 ? 'pos' : 'neg'
//! max($a, abs($b))   function invocation
//! ```

use super::{BinaryOp, Expr, Selector, UnaryOp};
use crate::value::Value;
use ariadne::{Config, Label, Report, ReportKind, Source};
use chumsky::{pratt::*, prelude::*};
use std::fmt;

pub type Span = SimpleSpan;

const SOURCE_NAME: &str = "expression";

/// Parse failure with a rendered, human readable report.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub errors: Vec<(std::ops::Range<usize>, String)>,
    pub report: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report)
    }
}

impl std::error::Error for ParseError {}

pub fn parse(code: &str) -> Result<Expr, ParseError> {
    expression()
        .then_ignore(end())
        .parse(code)
        .into_result()
        .map_err(|errors| report_errors(errors, code))
}

fn expression<'code>() -> impl Parser<'code, &'code str, Expr, extra::Err<Rich<'code, char, Span>>> {
    recursive(|expr| {
        let number = text::int(10)
            .then(just('.').then(text::digits(10)).or_not())
            .to_slice()
            .from_str::<f64>()
            .unwrapped()
            .map(|n| Expr::Constant(Value::number(n)));

        let text = just('\'')
            .ignore_then(none_of('\'').repeated().to_slice())
            .then_ignore(just('\''))
            .map(|text: &str| Expr::Constant(Value::text(text)));

        let index = expr
            .clone()
            .delimited_by(just('[').padded(), just(']'));
        let field = text::ascii::ident().map(|name: &str| Expr::Constant(Value::text(name)));

        let selector = just('$')
            .ignore_then(choice((field, index.clone())).or_not())
            .then(
                choice((
                    just('.').ignore_then(
                        text::ascii::ident().map(|name: &str| Expr::Constant(Value::text(name))),
                    ),
                    index,
                ))
                .repeated()
                .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| Expr::Selector(Selector::path(first.into_iter().chain(rest))));

        let arguments = expr
            .clone()
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded(), just(')'));

        let word = text::ascii::ident().then(arguments.or_not()).try_map(
            |(name, arguments): (&str, Option<Vec<Expr>>), span| match (name, arguments) {
                ("true", None) => Ok(Expr::Constant(Value::Bool(true))),
                ("false", None) => Ok(Expr::Constant(Value::Bool(false))),
                (name, Some(args)) => Ok(Expr::invoke(name, args)),
                (name, None) => Err(Rich::custom(
                    span,
                    format!("unknown identifier '{name}', fields are written '${name}'"),
                )),
            },
        );

        let parenthesized = expr
            .clone()
            .delimited_by(just('(').padded(), just(')'));

        let atom = choice((number, text, selector, word, parenthesized)).padded();

        let op = |symbol: &'static str| just(symbol).padded();

        let operators = atom.pratt((
            prefix(
                9,
                choice((
                    op("!").to(UnaryOp::Not),
                    op("-").to(UnaryOp::Negative),
                    op("+").to(UnaryOp::Positive),
                )),
                |op, operand, _| Expr::unary(op, operand),
            ),
            infix(
                left(7),
                choice((
                    op("*").to(BinaryOp::Times),
                    op("/").to(BinaryOp::Divide),
                    op("%").to(BinaryOp::Modulo),
                )),
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(6),
                choice((op("+").to(BinaryOp::Plus), op("-").to(BinaryOp::Minus))),
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(5),
                choice((
                    op("<=").to(BinaryOp::Le),
                    op(">=").to(BinaryOp::Ge),
                    op("<").to(BinaryOp::Lt),
                    op(">").to(BinaryOp::Gt),
                )),
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(4),
                choice((op("==").to(BinaryOp::Eq), op("!=").to(BinaryOp::Ne))),
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(left(3), op("&&").to(BinaryOp::And), |l, op, r, _| {
                Expr::binary(op, l, r)
            }),
            infix(left(2), op("||").to(BinaryOp::Or), |l, op, r, _| {
                Expr::binary(op, l, r)
            }),
        ));

        operators
            .then(
                just('?')
                    .padded()
                    .ignore_then(expr.clone())
                    .then_ignore(just(':').padded())
                    .then(expr)
                    .or_not(),
            )
            .map(|(condition, branches)| match branches {
                Some((then, otherwise)) => Expr::conditional(condition, then, otherwise),
                None => condition,
            })
    })
}

fn report_errors(errors: Vec<Rich<'_, char, Span>>, code: &str) -> ParseError {
    let mut report = Vec::new();
    let mut collected = Vec::new();
    for error in errors {
        let range = error.span().into_range();
        let written = Report::build(ReportKind::Error, (SOURCE_NAME, range.clone()))
            .with_config(Config::default().with_color(false))
            .with_message(error.to_string())
            .with_label(
                Label::new((SOURCE_NAME, range.clone())).with_message(error.reason().to_string()),
            )
            .finish()
            .write((SOURCE_NAME, Source::from(code)), &mut report);
        if written.is_err() {
            report.extend_from_slice(error.to_string().as_bytes());
            report.push(b'\n');
        }
        collected.push((range, error.to_string()));
    }
    ParseError {
        errors: collected,
        report: String::from_utf8_lossy(&report).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_follows_arithmetic() {
        let expr = parse("$a + $b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Plus,
                Expr::get("a"),
                Expr::binary(BinaryOp::Times, Expr::get("b"), Expr::constant(2)),
            )
        );
    }

    #[test]
    fn nested_and_dynamic_selectors() {
        assert_eq!(
            parse("$user.name").unwrap(),
            Expr::Selector(Selector::path([Expr::constant("user"), Expr::constant("name")]))
        );
        assert_eq!(
            parse("$[$k]").unwrap(),
            Expr::Selector(Selector::path([Expr::get("k")]))
        );
        assert_eq!(parse("$").unwrap(), Expr::Selector(Selector::Identity));
    }

    #[test]
    fn conditional_is_lowest() {
        let expr = parse("$x > 1 ? 'big' : 'small'").unwrap();
        assert_eq!(
            expr,
            Expr::conditional(
                Expr::binary(BinaryOp::Gt, Expr::get("x"), Expr::constant(1)),
                Expr::constant("big"),
                Expr::constant("small"),
            )
        );
    }

    #[test]
    fn prefix_and_invocation() {
        assert_eq!(
            parse("!$done").unwrap(),
            Expr::unary(UnaryOp::Not, Expr::get("done"))
        );
        assert_eq!(
            parse("max(1, $a)").unwrap(),
            Expr::invoke("max", vec![Expr::constant(1), Expr::get("a")])
        );
        assert_eq!(parse("true").unwrap(), Expr::constant(true));
    }

    #[test]
    fn errors_are_reported() {
        let error = parse("$a +").unwrap_err();
        assert!(!error.errors.is_empty());
        assert!(error.report.contains("Error"));

        let error = parse("a + 1").unwrap_err();
        assert!(error.errors[0].1.contains("unknown identifier"));
    }
}
