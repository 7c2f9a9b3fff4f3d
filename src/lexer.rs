//! Line-oriented scanner turning source text into [`Token`]s.
//!
//! Each line is truncated at the first `;`, then scanned left to right:
//! parens are always tokens of their own, a space separates atoms, and every
//! other character belongs to the atom being accumulated. The scanner never
//! fails; structural problems are reported by the parser.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::{map, value},
    sequence::preceded,
};

/// A raw lexical unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open,
    Close,
    Atom(String),
}

impl Token {
    pub fn as_str(&self) -> &str {
        match self {
            Token::Open => "(",
            Token::Close => ")",
            Token::Atom(atom) => atom,
        }
    }
}

fn is_blank(c: char) -> bool {
    c == ' '
}

fn is_atom_char(c: char) -> bool {
    !is_blank(c) && c != '(' && c != ')'
}

fn parse_atom(input: &str) -> IResult<&str, Token> {
    map(take_while1(is_atom_char), |atom: &str| {
        Token::Atom(atom.to_owned())
    })
    .parse(input)
}

/// Scan one token, skipping leading blanks
fn parse_token(input: &str) -> IResult<&str, Token> {
    preceded(
        take_while(is_blank),
        alt((
            value(Token::Open, char('(')),
            value(Token::Close, char(')')),
            parse_atom,
        )),
    )
    .parse(input)
}

fn strip_comment(line: &str) -> &str {
    match line.split_once(';') {
        Some((code, _comment)) => code,
        None => line,
    }
}

/// Lazy token stream over a source string.
///
/// Cloning a `Tokens` restarts scanning from the clone's position.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    lines: std::str::Lines<'a>,
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(source: &'a str) -> Self {
        Tokens {
            lines: source.lines(),
            rest: "",
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            match parse_token(self.rest) {
                Ok((rest, token)) => {
                    self.rest = rest;
                    return Some(token);
                }
                // Current line exhausted: continue with the next one
                Err(_) => self.rest = strip_comment(self.lines.next()?),
            }
        }
    }
}

impl std::iter::FusedIterator for Tokens<'_> {}

/// Scan `source` lazily
pub fn lex(source: &str) -> Tokens<'_> {
    Tokens::new(source)
}

/// Scan `source` into a token vector
pub fn tokenize(source: &str) -> Vec<Token> {
    lex(source).collect()
}
