use crate::scanner::token::TokenType;

/// Every reserved word and the token type it scans to.
pub const KEYWORDS: [(&str, TokenType); 16] = [
    ("and", TokenType::And),
    ("class", TokenType::Class),
    ("else", TokenType::Else),
    ("false", TokenType::False),
    ("for", TokenType::For),
    ("fun", TokenType::Fun),
    ("if", TokenType::If),
    ("nil", TokenType::Nil),
    ("or", TokenType::Or),
    ("print", TokenType::Print),
    ("return", TokenType::Return),
    ("super", TokenType::Super),
    ("this", TokenType::This),
    ("true", TokenType::True),
    ("var", TokenType::Var),
    ("while", TokenType::While),
];

pub fn keyword(text: &str) -> Option<TokenType> {
    KEYWORDS
        .iter()
        .find(|(word, _)| *word == text)
        .map(|(_, token_type)| *token_type)
}
