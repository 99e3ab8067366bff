//! Parser for Nominal
//!
//! Recursive descent with a Pratt-style precedence loop for binary
//! operators. Produces the [`Node`] tree consumed by the code generator.
//!
//! Two context-sensitive rules come from the lexer's skip flags:
//!
//! - a unary operator must touch its operand (`-x`, never `- x`);
//! - `:` invocation arguments run to the end of the line.
//!
//! Function-literal parameter lists are parsed speculatively: the parser
//! tries `ident… |`, and rewinds the lexer when that fails, re-reading
//! the same tokens as the function body.
//!
//! The first error aborts the parse; messages carry the source line
//! (`"Expected closing ')' on line 3"`).

use crate::ast::{Node, Op};
use crate::lexer::{Lexer, TokenType};
use nominal_core::StringPool;

/// Functions accept at most this many parameters.
pub const MAX_FUNCTION_PARAMS: usize = 16;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    pool: &'a mut StringPool,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, pool: &'a mut StringPool) -> Parser<'a> {
        let mut lexer = Lexer::new(source);
        lexer.next();
        Parser { lexer, pool }
    }

    /// Parse a whole snippet: a sequence of expressions separated by
    /// commas or newlines.
    pub fn parse(&mut self) -> Result<Node, String> {
        self.exprs(true)
    }

    /// Parse an expression sequence. `newlines` controls whether a
    /// skipped newline continues the sequence (true at the top level and
    /// in function bodies, false inside map literals where only commas
    /// separate items).
    fn exprs(&mut self, newlines: bool) -> Result<Node, String> {
        let mut items = vec![self.expr()?];

        loop {
            if self.lexer.is_symbol(b',') {
                self.lexer.next();
            } else if !(newlines
                && self.lexer.skipped_newline()
                && !self.lexer.is_symbol(b']')
                && !self.lexer.is_symbol(b'}'))
            {
                break;
            }
            items.push(self.expr()?);
        }

        Ok(Node::Sequence(items))
    }

    fn expr(&mut self) -> Result<Node, String> {
        let left = self.primary_expr()?;
        self.binexpr(0, left)
    }

    /// A primary expression: an optional unary operator applied to a
    /// secondary expression.
    fn primary_expr(&mut self) -> Result<Node, String> {
        if !self.lexer.is_type(TokenType::Operator) {
            return self.secondary_expr();
        }

        let mut op = self.lexer.operator_token();
        if op == Op::Sub {
            op = Op::Neg;
        }

        if op != Op::Not && op != Op::Neg {
            return self.error(format!("Operator '{}' is not unary", op.symbol()));
        }

        self.lexer.next();

        if self.lexer.skipped_whitespace() {
            return self.error(format!(
                "Unary operator '{}' cannot have trailing whitespace",
                op.symbol()
            ));
        }

        let expr = self.primary_expr()?;
        Ok(Node::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    /// A secondary expression: a literal, identifier, or parenthesized
    /// expression, followed by any chain of indexing, dot access, and
    /// `:` invocation.
    fn secondary_expr(&mut self) -> Result<Node, String> {
        let mut node = match self.lexer.token_type() {
            TokenType::Symbol => {
                if self.lexer.is_symbol(b'(') {
                    self.paren_expr()?
                } else if self.lexer.is_symbol(b'{') {
                    self.map_literal()?
                } else if self.lexer.is_symbol(b'[') {
                    self.function_literal()?
                } else {
                    return self.unexpected_token();
                }
            }
            TokenType::Number => {
                let value = self.lexer.token_number();
                self.lexer.next();
                Node::Number(value)
            }
            TokenType::String | TokenType::Identifier => self.string_or_ident()?,
            _ => return self.unexpected_token(),
        };

        // Postfix operations bind only when they touch the expression:
        // `m[k]` indexes, `m [k]` does not.
        if !self.lexer.skipped_whitespace() {
            loop {
                if self.lexer.is_symbol(b'[') {
                    self.lexer.next();

                    let key = self.expr()?;
                    if !self.lexer.is_symbol(b']') {
                        return self.error("Expected closing ']'");
                    }
                    self.lexer.next();

                    node = Node::Index {
                        expr: Box::new(node),
                        key: Box::new(key),
                        bracket: true,
                    };
                } else if self.lexer.is_symbol(b'.') {
                    self.lexer.next();

                    if !self.lexer.is_type(TokenType::Identifier) {
                        return self.error("Right side of '.' operation must be an identifier");
                    }

                    // The identifier indexes by its string value
                    let id = match self.string_or_ident()? {
                        Node::Ident(id) | Node::String(id) => id,
                        _ => unreachable!(),
                    };

                    node = Node::Index {
                        expr: Box::new(node),
                        key: Box::new(Node::String(id)),
                        bracket: false,
                    };
                } else if self.lexer.is_symbol(b':') {
                    self.lexer.next();

                    let mut args = Vec::new();

                    // Arguments are parsed only when whitespace follows
                    // the ':', and run until the end of the line. The end
                    // of the list is found by speculation: when the next
                    // tokens do not parse as an argument, rewind.
                    if self.lexer.skipped_whitespace() {
                        while !self.lexer.skipped_newline() {
                            let saved = self.lexer.save();
                            match self.primary_expr() {
                                Ok(arg) => args.push(arg),
                                Err(_) => {
                                    self.lexer.restore(saved);
                                    break;
                                }
                            }
                        }
                    }

                    node = Node::Invocation {
                        expr: Box::new(node),
                        args,
                    };
                } else {
                    break;
                }
            }
        }

        Ok(node)
    }

    fn paren_expr(&mut self) -> Result<Node, String> {
        self.lexer.next();

        let expr = self.expr()?;

        if !self.lexer.is_symbol(b')') {
            return self.error("Expected closing ')'");
        }
        self.lexer.next();

        Ok(expr)
    }

    /// The Pratt loop: fold binary operators of at least `prec` onto
    /// `left`, ascending into higher-precedence right-hand sides.
    fn binexpr(&mut self, prec: i32, mut left: Node) -> Result<Node, String> {
        loop {
            if !self.lexer.is_type(TokenType::Operator) {
                return Ok(left);
            }

            let op = self.lexer.operator_token();
            let op_prec = op.precedence();
            if op_prec < prec {
                return Ok(left);
            }

            self.lexer.next();

            let mut right = self.primary_expr()?;

            // If a tighter-binding operator follows, it takes the
            // right-hand expression first
            if self.lexer.is_type(TokenType::Operator) {
                let next_prec = self.lexer.operator_token().precedence();
                if op_prec < next_prec {
                    right = self.binexpr(op_prec + 1, right)?;
                }
            }

            if op == Op::Define
                && !matches!(left, Node::Ident(_))
                && !matches!(left, Node::Index { bracket: false, .. })
            {
                return self.error("The left side of a ':=' expression must be an identifier");
            }

            if op == Op::Assign && !matches!(left, Node::Ident(_) | Node::Index { .. }) {
                return self.error("The left side of a '=' expression must be an identifier");
            }

            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    /// A map literal. Items written `key -> value` keep their key,
    /// `name := value` stringifies the identifier, and positional items
    /// take the item counter as a numeric key.
    fn map_literal(&mut self) -> Result<Node, String> {
        self.lexer.next();

        if self.lexer.is_symbol(b'}') {
            self.lexer.next();
            return Ok(Node::Map(Vec::new()));
        }

        let items = self.exprs(false)?;

        if !self.lexer.is_symbol(b'}') {
            return self.error("Expected closing '}'");
        }
        self.lexer.next();

        let Node::Sequence(items) = items else {
            unreachable!()
        };

        let mut pairs = Vec::with_capacity(items.len());
        for (position, item) in items.into_iter().enumerate() {
            let pair = match item {
                // `name := value` supplies the identifier as a string key
                Node::Binary {
                    op: Op::Define,
                    left,
                    right,
                } if matches!(*left, Node::Ident(_)) => {
                    let Node::Ident(id) = *left else { unreachable!() };
                    (Node::String(id), *right)
                }
                // `key -> value` supplies an explicit key
                Node::Binary {
                    op: Op::Assoc,
                    left,
                    right,
                } => (*left, *right),
                // Positional items are keyed by their position
                item => (Node::Number(position as f64), item),
            };
            pairs.push(pair);
        }

        Ok(Node::Map(pairs))
    }

    /// A function literal: `[ a b | body ]` or `[ body ]`. The parameter
    /// list is speculative — on failure the lexer rewinds and everything
    /// parses as the body.
    fn function_literal(&mut self) -> Result<Node, String> {
        self.lexer.next();

        let saved = self.lexer.save();

        let mut params = Some(Vec::new());
        loop {
            if !self.lexer.is_type(TokenType::Identifier) {
                params = None;
                break;
            }

            let id = self.pool.intern(self.lexer.token_text());
            self.lexer.next();

            if let Some(params) = params.as_mut() {
                params.push(id);
            }

            if self.lexer.is_symbol(b'|') {
                self.lexer.next();
                break;
            }
        }

        let params = match params {
            Some(params) => {
                if params.len() > MAX_FUNCTION_PARAMS {
                    return self.error(format!(
                        "Functions cannot have more than {MAX_FUNCTION_PARAMS} parameters"
                    ));
                }
                params
            }
            None => {
                self.lexer.restore(saved);
                Vec::new()
            }
        };

        let body = self.exprs(true)?;

        if !self.lexer.is_symbol(b']') {
            return self.error("Expected closing ']'");
        }
        self.lexer.next();

        Ok(Node::Function {
            params,
            body: Box::new(body),
        })
    }

    fn string_or_ident(&mut self) -> Result<Node, String> {
        let node = match self.lexer.token_type() {
            TokenType::String => Node::String(self.pool.intern(self.lexer.token_text())),
            TokenType::Identifier => Node::Ident(self.pool.intern(self.lexer.token_text())),
            _ => return self.error("Expected a string or identifier"),
        };

        self.lexer.next();

        Ok(node)
    }

    fn unexpected_token(&self) -> Result<Node, String> {
        self.error(format!("Unexpected token '{}'", self.lexer.token_text()))
    }

    fn error<T>(&self, message: impl std::fmt::Display) -> Result<T, String> {
        Err(format!("{} on line {}", message, self.lexer.line()))
    }
}
