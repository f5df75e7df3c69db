use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub line: usize, // 1-indexed
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: impl Into<String>, line: usize) -> Self {
        Token {
            token_type,
            lexeme: lexeme.into(),
            literal: None,
            line,
        }
    }

    pub fn with_literal(mut self, literal: Literal) -> Self {
        self.literal = Some(literal);
        self
    }

    /// The lexeme as it should appear in diagnostics. The EOF token has an
    /// empty lexeme, so it is rendered as `end`.
    pub fn display_lexeme(&self) -> &str {
        match self.token_type {
            TokenType::Eof => "end",
            _ => &self.lexeme,
        }
    }
}

/// Scalar value carried by NUMBER and STRING tokens.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(Rc<str>), // without the surrounding quotes
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,  // (
    RightParen, // )
    LeftBrace,  // {
    RightBrace, // }
    Comma,      // ,
    Dot,        // .
    Minus,      // -
    Plus,       // +
    Semicolon,  // ;
    Slash,      // /
    Star,       // *

    // One or two character tokens
    Bang,         // !
    BangEqual,    // !=
    Equal,        // =
    EqualEqual,   // ==
    Greater,      // >
    GreaterEqual, // >=
    Less,         // <
    LessEqual,    // <=

    // Literals
    Identifier, // variable names, function names
    String,     // "hello world"
    Number,     // 123, 45.67

    // Keywords
    And,    // and
    Class,  // class
    Else,   // else
    False,  // false
    Fun,    // fun
    For,    // for
    If,     // if
    Nil,    // nil
    Or,     // or
    Print,  // print
    Return, // return
    Super,  // super
    This,   // this
    True,   // true
    Var,    // var
    While,  // while

    // Control
    Eof, // end of file
}

impl TokenType {
    /// Tokens that can begin a statement; the parser resumes at one of these
    /// after a syntax error.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            TokenType::Class
                | TokenType::For
                | TokenType::Fun
                | TokenType::If
                | TokenType::Print
                | TokenType::Return
                | TokenType::Var
                | TokenType::While
        )
    }
}
