pub mod token;

use crate::keywords::keyword;
use crate::scanner::token::{Literal, Token, TokenType};
use thiserror::Error;

/// A scan failure. Scanning stops at the first one, so no partial token
/// stream is ever handed to the parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("Error at line {line} around '\"': Unterminated string.")]
    UnterminatedString { line: usize },
    #[error("Error at line {line} around '/*': Unterminated block comment.")]
    UnterminatedComment { line: usize },
    #[error("Error at line {line} around '{character}': Unexpected character.")]
    UnexpectedCharacter { character: char, line: usize },
}

/// Convenience wrapper around [`Scanner::scan_tokens`].
pub fn scan(source: &str) -> Result<Vec<Token>, LexError> {
    Scanner::new(source).scan_tokens()
}

pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
}

impl Scanner {
    pub fn new(source: impl Into<String>) -> Self {
        Scanner {
            source: source.into().chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, LexError> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(TokenType::Eof, "", self.line));
        tracing::trace!(count = self.tokens.len(), lines = self.line, "scanned source");
        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> Result<(), LexError> {
        let c = self.advance();
        match c {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            ',' => self.add_token(TokenType::Comma),
            '.' => self.add_token(TokenType::Dot),
            '-' => self.add_token(TokenType::Minus),
            '+' => self.add_token(TokenType::Plus),
            ';' => self.add_token(TokenType::Semicolon),
            '*' => self.add_token(TokenType::Star),

            // One or two character tokens
            '!' => {
                let token_type = if self.match_char('=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                self.add_token(token_type);
            }

            '=' => {
                let token_type = if self.match_char('=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                self.add_token(token_type);
            }

            '>' => {
                let token_type = if self.match_char('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }

            '<' => {
                let token_type = if self.match_char('=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }

            '/' => {
                if self.match_char('/') {
                    // Comment goes until end of line
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else {
                    self.add_token(TokenType::Slash);
                }
            }

            ' ' | '\r' | '\t' => {}

            '\n' => self.line += 1,

            '"' => self.handle_string()?,

            c if c.is_ascii_digit() => self.handle_number(),

            c if is_identifier_start(c) => self.handle_identifier(),

            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character: c,
                    line: self.line,
                })
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> char {
        let ch = self.source[self.current];
        self.current += 1;
        ch
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn match_char(&mut self, expected: char) -> bool {
        match self.source.get(self.current) {
            Some(&ch) if ch == expected => {
                self.current += 1;
                true
            }
            _ => false,
        }
    }

    // The opening "/*" is already consumed.
    fn block_comment(&mut self) -> Result<(), LexError> {
        let opened_at = self.line;
        loop {
            if self.is_at_end() {
                return Err(LexError::UnterminatedComment { line: opened_at });
            }

            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance(); // consume '*'
                self.advance(); // consume '/'
                return Ok(());
            }

            if self.advance() == '\n' {
                self.line += 1;
            }
        }
    }

    fn handle_string(&mut self) -> Result<(), LexError> {
        let opened_at = self.line;
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(LexError::UnterminatedString { line: opened_at });
        }

        self.advance(); // closing quote

        // the literal value excludes the quotation marks, the lexeme keeps them
        let value: String = self.source[self.start + 1..self.current - 1].iter().collect();
        self.add_literal_token(TokenType::String, Literal::Str(value.into()));
        Ok(())
    }

    fn handle_number(&mut self) {
        // First digit is already consumed
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // A fractional part needs at least one digit after the dot
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance(); // consume '.'
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        // Digits with an optional fraction always parse; oversized values
        // round to infinity rather than failing.
        let num = self.current_lexeme().parse::<f64>().unwrap_or(f64::INFINITY);
        self.add_literal_token(TokenType::Number, Literal::Number(num));
    }

    fn handle_identifier(&mut self) {
        while is_identifier_char(self.peek()) {
            self.advance();
        }

        let text = self.current_lexeme();
        let token_type = keyword(&text).unwrap_or(TokenType::Identifier);
        self.add_token(token_type);
    }

    fn current_lexeme(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }

    fn add_token(&mut self, t: TokenType) {
        let text = self.current_lexeme();
        self.tokens.push(Token::new(t, text, self.line));
    }

    fn add_literal_token(&mut self, t: TokenType, literal: Literal) {
        let text = self.current_lexeme();
        self.tokens
            .push(Token::new(t, text, self.line).with_literal(literal));
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::KEYWORDS;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn token_types(source: &str) -> Vec<TokenType> {
        scan(source)
            .unwrap()
            .iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn scan_basic_tokens() {
        assert_eq!(
            token_types("var x = 5;"),
            vec![
                TokenType::Var,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Number,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn scan_one_or_two_character_operators() {
        assert_eq!(
            token_types("! != = == > >= < <="),
            vec![
                TokenType::Bang,
                TokenType::BangEqual,
                TokenType::Equal,
                TokenType::EqualEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn scan_operators_without_spaces() {
        assert_eq!(
            token_types("a>=b!=!c"),
            vec![
                TokenType::Identifier,
                TokenType::GreaterEqual,
                TokenType::Identifier,
                TokenType::BangEqual,
                TokenType::Bang,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn scan_every_keyword() {
        for (text, expected) in KEYWORDS {
            assert_eq!(token_types(text), vec![expected, TokenType::Eof], "{}", text);
        }
    }

    #[test]
    fn keyword_prefix_is_identifier() {
        assert_eq!(
            token_types("orchid variable _fun"),
            vec![
                TokenType::Identifier,
                TokenType::Identifier,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn scan_number_literals() {
        let tokens = scan("12 3.25").unwrap();
        assert_eq!(tokens[0].literal, Some(Literal::Number(12.0)));
        assert_eq!(tokens[1].literal, Some(Literal::Number(3.25)));
        assert_eq!(tokens[1].lexeme, "3.25");
    }

    #[test]
    fn oversized_number_literal_scans_as_infinity() {
        let digits = format!("1{}", "0".repeat(400));
        let tokens = scan(&digits).unwrap();
        assert_eq!(tokens[0].literal, Some(Literal::Number(f64::INFINITY)));
        assert_eq!(tokens[0].lexeme, digits);
    }

    #[test]
    fn trailing_dot_is_not_part_of_number() {
        assert_eq!(
            token_types("1."),
            vec![TokenType::Number, TokenType::Dot, TokenType::Eof]
        );
    }

    #[test]
    fn leading_dot_is_not_part_of_number() {
        assert_eq!(
            token_types(".5"),
            vec![TokenType::Dot, TokenType::Number, TokenType::Eof]
        );
    }

    #[test]
    fn minus_sign_is_a_separate_token() {
        assert_eq!(
            token_types("-3"),
            vec![TokenType::Minus, TokenType::Number, TokenType::Eof]
        );
    }

    #[test]
    fn scan_string_literal_without_quotes() {
        let tokens = scan("\"hello world\"").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::String);
        assert_eq!(tokens[0].lexeme, "\"hello world\"");
        assert_eq!(tokens[0].literal, Some(Literal::Str("hello world".into())));
    }

    #[test]
    fn multiline_string_counts_lines() {
        let tokens = scan("\"a\nb\"\nx").unwrap();
        assert_eq!(tokens[0].literal, Some(Literal::Str("a\nb".into())));
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn scan_error_on_unterminated_string() {
        let err = scan("var s = \"abc\n\ndef").unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { line: 1 });
        assert!(err.to_string().contains("Unterminated string"));
    }

    #[test]
    fn scan_single_line_comment_ignored() {
        let tokens = scan("// hello\n5").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn scan_block_comment_ignored_and_lines_counted() {
        let tokens = scan("/* one\ntwo\n*/ 5").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Number);
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn unterminated_block_comment_is_fatal() {
        let err = scan("1;\n/* never closed\n\n").unwrap_err();
        assert_eq!(err, LexError::UnterminatedComment { line: 2 });
    }

    #[test]
    fn block_comment_star_at_end_of_input() {
        let err = scan("/* *").unwrap_err();
        assert_eq!(err, LexError::UnterminatedComment { line: 1 });
    }

    #[test]
    fn unexpected_character_reports_line() {
        let err = scan("var a = 1;\n@").unwrap_err();
        assert_eq!(
            err,
            LexError::UnexpectedCharacter {
                character: '@',
                line: 2
            }
        );
        assert_eq!(
            err.to_string(),
            "Error at line 2 around '@': Unexpected character."
        );
    }

    #[test]
    fn eof_token_carries_final_line() {
        let tokens = scan("a\nb\n").unwrap();
        let eof = tokens.last().unwrap();
        assert_eq!(eof.token_type, TokenType::Eof);
        assert_eq!(eof.line, 3);
    }

    #[test]
    fn empty_source_is_only_eof() {
        assert_eq!(token_types(""), vec![TokenType::Eof]);
    }

    // --- Round-trip property ---

    fn lexeme_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(vec![
                "(", ")", "{", "}", ",", ".", "-", "+", ";", "/", "*", "!", "!=", "=", "==",
                ">", ">=", "<", "<=",
            ])
            .prop_map(String::from),
            prop::sample::select(KEYWORDS.iter().map(|(k, _)| *k).collect::<Vec<_>>())
                .prop_map(String::from),
            "[a-zA-Z_][a-zA-Z0-9_]{0,8}",
            (0u32..100_000).prop_map(|n| n.to_string()),
            (0u32..1000, 0u32..1000).prop_map(|(i, f)| format!("{}.{}", i, f)),
            "[a-zA-Z0-9 ]{0,10}".prop_map(|s| format!("\"{}\"", s)),
        ]
    }

    proptest! {
        #[test]
        fn rescanning_canonical_text_reproduces_tokens(
            lexemes in prop::collection::vec(lexeme_strategy(), 0..40)
        ) {
            let source = lexemes.join(" ");
            let first = scan(&source).unwrap();

            let rendered: Vec<&str> = first[..first.len() - 1]
                .iter()
                .map(|t| t.lexeme.as_str())
                .collect();
            let second = scan(&rendered.join(" ")).unwrap();

            prop_assert_eq!(first.len(), lexemes.len() + 1);
            prop_assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(second.iter()) {
                prop_assert_eq!(a.token_type, b.token_type);
                prop_assert_eq!(&a.literal, &b.literal);
            }
        }
    }
}
