pub mod ast;

use crate::parser::ast::{Expr, FunctionDecl, LiteralValue, Stmt};
use crate::scanner::token::{Literal, Token, TokenType};
use crate::stack::ensure_sufficient_stack;
use std::rc::Rc;
use thiserror::Error;

/// Upper bound on call arguments and function parameters.
pub const MAX_ARGUMENTS: usize = 255;

/// How deeply statements, blocks, groupings and unary operators may nest.
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Error at line {line} around '{lexeme}': {message}")]
pub struct ParseError {
    pub line: usize,
    pub lexeme: String,
    pub message: String,
}

impl ParseError {
    pub fn new(token: &Token, message: impl Into<String>) -> Self {
        ParseError {
            line: token.line,
            lexeme: token.display_lexeme().to_string(),
            message: message.into(),
        }
    }
}

/// Convenience wrapper around [`Parser::parse`].
pub fn parse(tokens: Vec<Token>) -> (Vec<Stmt>, Vec<ParseError>) {
    Parser::new(tokens).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    // errors that don't desynchronize the parser (bad assignment target, too
    // many arguments, ...) plus the ones recovered from via synchronize()
    errors: Vec<ParseError>,
    function_depth: usize,
    nesting: usize,
    // set once the nesting limit is hit; the rest of the input is skipped
    abandoned: bool,
}

impl Parser {
    /// `tokens` must end with an EOF token, as produced by the scanner.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.token_type) != Some(TokenType::Eof) {
            let line = tokens.last().map_or(1, |t| t.line);
            tokens.push(Token::new(TokenType::Eof, "", line));
        }
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            function_depth: 0,
            nesting: 0,
            abandoned: false,
        }
    }

    // utility methods
    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, token_type: TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().token_type == token_type
    }

    fn match_any(&mut self, types: &[TokenType]) -> bool {
        for t in types {
            if self.check(*t) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, ParseError> {
        if self.check(token_type) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(self.peek(), message))
        }
    }

    // Record an error at `token` without unwinding the current rule.
    fn report(&mut self, token: &Token, message: &str) {
        let error = ParseError::new(token, message);
        tracing::debug!(line = error.line, message = %error.message, "parse error");
        self.errors.push(error);
    }

    // Runs one level of a recursive rule. Past MAX_NESTING the error is
    // recorded once and the parser jumps to EOF so every enclosing rule
    // unwinds without reporting anything further.
    fn nested<T>(
        &mut self,
        rule: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING {
            let error = ParseError::new(self.peek(), "Too much nesting.");
            tracing::debug!(line = error.line, "nesting limit reached");
            self.errors.push(error.clone());
            self.abandoned = true;
            self.current = self.tokens.len() - 1;
            return Err(error);
        }

        self.nesting += 1;
        let result = ensure_sufficient_stack(|| rule(self));
        self.nesting -= 1;
        result
    }

    /// Parses the whole token stream. Statements that failed to parse are
    /// dropped; every error found along the way is returned with the
    /// statements that were recovered.
    pub fn parse(mut self) -> (Vec<Stmt>, Vec<ParseError>) {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.len(),
            "parsed program"
        );
        (statements, self.errors)
    }

    fn synchronize(&mut self) {
        self.advance(); // Skip the token that caused the error

        while !self.is_at_end() {
            // A consumed ';' ends the broken statement
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            // So does anything that starts a new one
            if self.peek().token_type.starts_statement() {
                return;
            }

            self.advance();
        }
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_any(&[TokenType::Fun]) {
            self.function()
        } else if self.match_any(&[TokenType::Var]) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(_) if self.abandoned => None,
            Err(error) => {
                tracing::debug!(line = error.line, message = %error.message, "parse error");
                self.errors.push(error);
                self.synchronize();
                None
            }
        }
    }

    fn function(&mut self) -> Result<Stmt, ParseError> {
        let name = self
            .consume(TokenType::Identifier, "Expect function name.")?
            .clone();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.")?;

        let mut params = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if params.len() == MAX_ARGUMENTS {
                    let token = self.peek().clone();
                    self.report(&token, "Can't have more than 255 parameters.");
                }
                params.push(
                    self.consume(TokenType::Identifier, "Expect parameter name.")?
                        .clone(),
                );
                if !self.match_any(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.")?;

        self.function_depth += 1;
        let body = self.block();
        self.function_depth -= 1;

        Ok(Stmt::Function(Rc::new(FunctionDecl {
            name,
            params,
            body: body?,
        })))
    }

    fn var_declaration(&mut self) -> Result<Stmt, ParseError> {
        let name = self
            .consume(TokenType::Identifier, "Expect variable name.")?
            .clone();

        let initializer = if self.match_any(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer })
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(|p| p.statement_kind())
    }

    fn statement_kind(&mut self) -> Result<Stmt, ParseError> {
        if self.match_any(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_any(&[TokenType::Print]) {
            self.print_statement()
        } else if self.match_any(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_any(&[TokenType::LeftBrace]) {
            Ok(Stmt::Block(self.block()?))
        } else if self.match_any(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_any(&[TokenType::For]) {
            self.for_statement()
        } else {
            self.expression_statement()
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_any(&[TokenType::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn print_statement(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.previous().clone();
        let expr = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { keyword, expr })
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.previous().clone();
        if self.function_depth == 0 {
            self.report(&keyword, "Can't return from top-level code.");
        }

        let value = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    // for (init; cond; incr) body  =>  { init; while (cond) { body; incr; } }
    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.match_any(&[TokenType::Semicolon]) {
            None
        } else if self.match_any(&[TokenType::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if self.check(TokenType::Semicolon) {
            Expr::Literal(LiteralValue::Bool(true))
        } else {
            self.expression()?
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if self.check(TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
        }

        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }

        Ok(body)
    }

    // The opening '{' is already consumed.
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested(|p| p.block_body())
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();

        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression(expr))
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.logic_or()?;

        if self.match_any(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?); // right-associative

            return match expr {
                Expr::Variable(name) => Ok(Expr::Assign { name, value }),
                other => {
                    // Reported, but the parser is still in sync
                    self.report(&equals, "Invalid assignment target.");
                    Ok(other)
                }
            };
        }

        Ok(expr)
    }

    // Every binary precedence level has the same shape: parse the next level
    // up, then fold left while one of `tokens` follows.
    fn binary_expression<F>(
        &mut self,
        tokens: &[TokenType],
        build: fn(Box<Expr>, Token, Box<Expr>) -> Expr,
        mut next_precedence: F,
    ) -> Result<Expr, ParseError>
    where
        F: FnMut(&mut Self) -> Result<Expr, ParseError>,
    {
        let mut left = next_precedence(self)?;

        while self.match_any(tokens) {
            let operator = self.previous().clone();
            let right = next_precedence(self)?;
            left = build(Box::new(left), operator, Box::new(right));
        }

        Ok(left)
    }

    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(&[TokenType::Or], logical, |p| p.logic_and())
    }

    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(&[TokenType::And], logical, |p| p.equality())
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(
            &[TokenType::EqualEqual, TokenType::BangEqual],
            binary,
            |p| p.comparison(),
        )
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            binary,
            |p| p.term(),
        )
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(&[TokenType::Plus, TokenType::Minus], binary, |p| {
            p.factor()
        })
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        self.binary_expression(&[TokenType::Star, TokenType::Slash], binary, |p| {
            p.unary()
        })
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_any(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let operand = self.nested(|p| p.unary())?; // chained unary: !!x
            Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
            })
        } else {
            self.call()
        }
    }

    fn call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        while self.match_any(&[TokenType::LeftParen]) {
            expr = self.finish_call(expr)?;
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let mut arguments = Vec::new();

        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() == MAX_ARGUMENTS {
                    let token = self.peek().clone();
                    self.report(&token, "Can't have more than 255 arguments.");
                }
                arguments.push(self.expression()?);
                if !self.match_any(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "Expect ')' after arguments.")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();

        let expr = match token.token_type {
            TokenType::False => Expr::Literal(LiteralValue::Bool(false)),
            TokenType::True => Expr::Literal(LiteralValue::Bool(true)),
            TokenType::Nil => Expr::Literal(LiteralValue::Nil),
            TokenType::Number | TokenType::String => match token.literal {
                Some(Literal::Number(n)) => Expr::Literal(LiteralValue::Number(n)),
                Some(Literal::Str(ref s)) => Expr::Literal(LiteralValue::Str(Rc::clone(s))),
                None => return Err(ParseError::new(&token, "Literal token without a value.")),
            },
            TokenType::Identifier => Expr::Variable(token),
            TokenType::LeftParen => {
                self.advance();
                let inner = self.nested(|p| p.expression())?;
                self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
                return Ok(Expr::Grouping(Box::new(inner)));
            }
            _ => return Err(ParseError::new(&token, "Expect expression.")),
        };

        self.advance();
        Ok(expr)
    }
}

fn binary(left: Box<Expr>, operator: Token, right: Box<Expr>) -> Expr {
    Expr::Binary {
        left,
        operator,
        right,
    }
}

fn logical(left: Box<Expr>, operator: Token, right: Box<Expr>) -> Expr {
    Expr::Logical {
        left,
        operator,
        right,
    }
}
