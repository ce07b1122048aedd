//! Tokenizer for cellscript.

use crate::error::{Error, Result};

/// Source position (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub(crate) fn error(self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Identifiers and keywords; the parser decides which is which.
    Ident(String),
    Punct(&'static str),
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Punct(p) => write!(f, "'{}'", p),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Token plus where it started.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Position,
}

/// Punctuators, longest first so that maximal munch works with a linear scan.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "+=", "-=", "*=", "/=",
    "(", ")", "{", "}", "[", "]", ",", ";", ":", ".", "?", "=", "<", ">", "+", "-", "*", "/",
    "%", "!",
];

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.position();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(start.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        let pos = self.position();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.advance();
        }
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text: String = self.input[start..self.pos].chars().filter(|&c| c != '_').collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| pos.error(format!("invalid number literal '{}'", text)))
    }

    fn string(&mut self, quote: char) -> Result<Token> {
        let pos = self.position();
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => return Ok(Token::Str(value)),
                Some('\\') => {
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some(c) => c,
                        None => return Err(pos.error("unterminated string literal")),
                    };
                    value.push(escaped);
                }
                Some('\n') | None => return Err(pos.error("unterminated string literal")),
                Some(c) => value.push(c),
            }
        }
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '$') {
            self.advance();
        }
        Token::Ident(self.input[start..self.pos].to_string())
    }

    fn punct(&mut self) -> Result<Token> {
        let rest = &self.input[self.pos..];
        let Some(p) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
            let c = self.peek().unwrap_or_default();
            return Err(self.position().error(format!("unexpected character '{}'", c)));
        };
        for _ in 0..p.len() {
            self.advance();
        }
        Ok(Token::Punct(p))
    }

    fn next_token(&mut self) -> Result<Spanned> {
        self.skip_trivia()?;
        let pos = self.position();
        let token = match self.peek() {
            None => Token::Eof,
            Some(c) if c.is_ascii_digit() => self.number()?,
            Some('.') if matches!(self.peek_second(), Some(c) if c.is_ascii_digit()) => {
                self.number()?
            }
            Some(c @ ('"' | '\'')) => self.string(c)?,
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => self.ident(),
            Some(_) => self.punct()?,
        };
        Ok(Spanned { token, pos })
    }
}

/// Split `source` into tokens. The last token is always [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_statement_tokens() {
        assert_eq!(
            kinds("let x=4;"),
            vec![
                Token::Ident("let".into()),
                Token::Ident("x".into()),
                Token::Punct("="),
                Token::Number(4.0),
                Token::Punct(";"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("a !== b => c ** 2"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("!=="),
                Token::Ident("b".into()),
                Token::Punct("=>"),
                Token::Ident("c".into()),
                Token::Punct("**"),
                Token::Number(2.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_dollar_is_identifier() {
        assert_eq!(kinds("$.sum")[0], Token::Ident("$".into()));
    }

    #[test]
    fn test_comments_and_positions() {
        let tokens = tokenize("// head\n/* block\n */ x").unwrap();
        assert_eq!(tokens[0].token, Token::Ident("x".into()));
        assert_eq!(tokens[0].pos, Position { line: 3, column: 5 });
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#"'a\'b\n'"#)[0], Token::Str("a'b\n".into()));
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = tokenize("let s = \"abc").unwrap_err();
        assert_eq!(
            err,
            Error::Parse {
                line: 1,
                column: 9,
                message: "unterminated string literal".into()
            }
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000 2.5 1e3 .5")[..4], [
            Token::Number(1000.0),
            Token::Number(2.5),
            Token::Number(1000.0),
            Token::Number(0.5),
        ]);
    }
}
