//! Recursive-descent parser from [`Token`]s to [`Expr`] trees.

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{Expr, Number};
use crate::lexer::{Token, tokenize};

/// Check the overall paren structure before descending
fn validate_structure(tokens: &[Token]) -> Result<(), Error> {
    if let [first, .., last] = tokens
        && (*first != Token::Open || *last != Token::Close)
    {
        return Err(Error::SyntaxError(
            "expression must begin with '(' and end with ')'".to_owned(),
        ));
    }

    let (open, close) = tokens
        .iter()
        .fold((0usize, 0usize), |(open, close), token| match token {
            Token::Open => (open + 1, close),
            Token::Close => (open, close + 1),
            Token::Atom(_) => (open, close),
        });
    if open != close {
        return Err(Error::SyntaxError(format!(
            "mismatched number of parentheses: {open} opening, {close} closing"
        )));
    }

    Ok(())
}

fn parse_atom(atom: &str) -> Expr {
    match Number::from_atom(atom) {
        Some(n) => Expr::Number(n),
        None => Expr::Symbol(atom.to_owned()),
    }
}

/// Parse the expression starting at `index`, returning it with the index just past it
fn parse_expression(tokens: &[Token], index: usize, depth: usize) -> Result<(Expr, usize), Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::SyntaxError(format!(
            "expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"
        )));
    }

    match tokens.get(index) {
        Some(Token::Open) => {
            let mut elements = Vec::new();
            let mut next = index + 1;
            loop {
                match tokens.get(next) {
                    Some(Token::Close) => return Ok((Expr::List(elements), next + 1)),
                    Some(_) => {
                        let (element, after) = parse_expression(tokens, next, depth + 1)?;
                        elements.push(element);
                        next = after;
                    }
                    None => {
                        return Err(Error::SyntaxError("unexpected end of input".to_owned()));
                    }
                }
            }
        }
        Some(Token::Close) => Err(Error::SyntaxError("unexpected ')'".to_owned())),
        Some(Token::Atom(atom)) => Ok((parse_atom(atom), index + 1)),
        None => Err(Error::SyntaxError("unexpected end of input".to_owned())),
    }
}

/// Parse a token sequence into its first top-level expression.
///
/// An empty token sequence is not an error: it yields `Ok(None)`.
/// Tokens following the first complete expression are ignored.
pub fn parse(tokens: &[Token]) -> Result<Option<Expr>, Error> {
    validate_structure(tokens)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let (expr, _next) = parse_expression(tokens, 0, 0)?;
    Ok(Some(expr))
}

/// Tokenize and parse `source`
pub fn parse_source(source: &str) -> Result<Option<Expr>, Error> {
    parse(&tokenize(source))
}
