//! Dashboard-API expression language.
//!
//! A Python subset — attribute navigation, subscripts, comparisons and
//! chains, `and`/`or`/`not`, membership, `re.match`/`re.search`,
//! `startswith`/`endswith` — parsed to an AST and lowered to SQL fragments
//! against the runs table and its side tables.

mod compile;
mod lexer;
mod parser;

pub use compile::{DefaultExpression, ParsedQuery, QueryParser, Tables};
