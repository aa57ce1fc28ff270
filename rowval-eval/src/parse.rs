//! Bounded expression parsing over a pre-built token stream.

use rowval_result::{Error, Result};
use sqlparser::ast::Expr;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::TokenWithSpan;

use crate::DIALECT;

/// Parses one cell's expression from tokens the caller already produced.
///
/// The tokens keep their original spans, so the caller can translate the
/// reader's position back into a byte offset after consuming an expression
/// and its trailing delimiter.
pub struct ExprReader {
    parser: Parser<'static>,
}

impl ExprReader {
    pub fn new(tokens: Vec<TokenWithSpan>, max_depth: usize) -> Self {
        let parser = Parser::new(&DIALECT)
            .with_recursion_limit(max_depth)
            .with_tokens_with_locations(tokens);
        ExprReader { parser }
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parser
            .parse_expr()
            .map_err(|e| Error::Syntax(e.to_string()))
    }

    /// Next significant token without consuming it.
    pub fn peek_token(&mut self) -> TokenWithSpan {
        self.parser.peek_token()
    }

    /// Consume and return the next significant token.
    pub fn next_token(&mut self) -> TokenWithSpan {
        self.parser.next_token()
    }
}
