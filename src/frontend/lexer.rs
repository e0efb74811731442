use thiserror::Error;

use crate::frontend::token::{Loc, Token, TokenKind};

#[derive(Debug, Clone, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

/// Single-pass scanner with one-token lookahead.
///
/// The lexer is a pull interface: `next` produces one token at a time and
/// `peek` is implemented by saving and restoring the scanner position.
/// Once the input is exhausted every further call yields `EndOfFile`.
///
/// Keywords are not recognized here; `func`, `let`, `if` and friends come
/// out as plain `Identifier` tokens and the parser matches on their text.
pub struct Lexer<'a> {
    source: &'a str,
    at: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            at: 0,
            line: 1,
            col: 1,
        }
    }

    fn byte(&self, at: usize) -> Option<u8> {
        self.source.as_bytes().get(at).copied()
    }

    fn current(&self) -> Option<u8> {
        self.byte(self.at)
    }

    fn lookahead(&self) -> Option<u8> {
        self.byte(self.at + 1)
    }

    fn advance(&mut self) {
        if self.current() == Some(b'\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.at += 1;
    }

    /// Skips spaces, tabs, carriage returns, newlines and `//` comments.
    /// A comment runs to the end of the line but leaves the newline for
    /// the normal path, so a comment line bumps the line counter once.
    fn eat_whitespace(&mut self) {
        while let Some(c) = self.current() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b'/' if self.lookahead() == Some(b'/') => {
                    while let Some(c) = self.current() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn error(&self, message: String) -> LexError {
        LexError {
            message,
            line: self.line,
            col: self.col,
        }
    }

    /// Produces the next token, or a `LexError` for a byte the scanner
    /// does not recognize.
    pub fn next(&mut self) -> Result<Token<'a>, LexError> {
        self.eat_whitespace();

        let start = self.at;
        let loc = Loc {
            line: self.line,
            col: self.col,
            offset: self.at as u32,
            len: 0,
        };

        let c = match self.current() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::EndOfFile,
                    loc,
                    text: "",
                });
            }
        };

        let kind = match c {
            b'^' => self.single(TokenKind::Caret),
            b'&' => self.single(TokenKind::Ampersand),
            b'*' => self.single(TokenKind::Asterisk),
            b'+' => self.one_or_two(
                TokenKind::Plus,
                &[(b'+', TokenKind::PlusPlus), (b'=', TokenKind::PlusEquals)],
            ),
            b'-' => self.one_or_two(
                TokenKind::Minus,
                &[(b'-', TokenKind::MinusMinus), (b'=', TokenKind::MinusEquals)],
            ),
            b'=' => self.one_or_two(TokenKind::Equals, &[(b'=', TokenKind::EqualsEquals)]),
            b':' => self.single(TokenKind::Colon),
            b';' => self.single(TokenKind::SemiColon),
            b',' => self.single(TokenKind::Comma),
            b'/' => self.single(TokenKind::ForwardSlash),
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b'[' => self.single(TokenKind::LeftBracket),
            b']' => self.single(TokenKind::RightBracket),
            b'{' => self.single(TokenKind::LeftCurly),
            b'}' => self.single(TokenKind::RightCurly),
            b'<' => self.one_or_two(TokenKind::LessThan, &[(b'=', TokenKind::LessThanEquals)]),
            b'>' => self.one_or_two(
                TokenKind::GreaterThan,
                &[(b'=', TokenKind::GreaterThanEquals)],
            ),
            b'!' => self.one_or_two(
                TokenKind::Exclamation,
                &[(b'=', TokenKind::ExclamationEquals)],
            ),
            b'.' if self.lookahead().is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            b'.' => self.single(TokenKind::Dot),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.read_identifier(),
            b'"' => self.read_string(),
            c => return Err(self.error(format!("unknown character: '{}'", c as char))),
        };

        let source = self.source;
        let text = &source[start..self.at];
        Ok(Token {
            kind,
            loc: Loc {
                len: (self.at - start) as u32,
                ..loc
            },
            text,
        })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    /// Disambiguates a two-character token against its one-character
    /// prefix (`==` vs `=`, `+=`/`++` vs `+`, ...).
    fn one_or_two(&mut self, short: TokenKind, long: &[(u8, TokenKind)]) -> TokenKind {
        let next = self.lookahead();
        for (c, kind) in long {
            if next == Some(*c) {
                self.advance();
                self.advance();
                return *kind;
            }
        }
        self.advance();
        short
    }

    /// A number is a maximal run of digits and dots starting from a digit
    /// or a dot. Runs with more than one dot are accepted here and
    /// rejected when the parser converts the lexeme.
    fn read_number(&mut self) -> TokenKind {
        while let Some(c) = self.current() {
            if c.is_ascii_digit() || c == b'.' {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Number
    }

    fn read_identifier(&mut self) -> TokenKind {
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Identifier
    }

    /// Scans a `"..."` literal. There is no escape processing, and the
    /// token text keeps both quotes.
    fn read_string(&mut self) -> TokenKind {
        self.advance();
        while let Some(c) = self.current() {
            if c == b'"' {
                break;
            }
            self.advance();
        }
        if self.current() == Some(b'"') {
            self.advance();
        }
        TokenKind::String
    }

    /// Returns the next token without consuming it.
    pub fn peek(&mut self) -> Result<Token<'a>, LexError> {
        let (at, line, col) = (self.at, self.line, self.col);
        let token = self.next();
        self.at = at;
        self.line = line;
        self.col = col;
        token
    }

    pub fn test_kind(&mut self, kind: TokenKind) -> Result<bool, LexError> {
        Ok(self.peek()?.kind == kind)
    }

    /// True when the next token is an identifier spelled exactly `word`.
    pub fn test_word(&mut self, word: &str) -> Result<bool, LexError> {
        Ok(self.peek()?.is_word(word))
    }

    /// Consumes the next token, failing unless it has the given kind.
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>, LexError> {
        let token = self.next()?;
        if token.kind != kind {
            return Err(LexError {
                message: format!("expected {}, got {}", kind, token.kind),
                line: token.loc.line,
                col: token.loc.col,
            });
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next().unwrap();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            out.push(token.kind);
        }
        out
    }

    fn all_tokens(source: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next().unwrap();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            out.push((token.kind, token.text.to_string()));
        }
        out
    }

    #[test]
    fn test_single_char_tokens() {
        assert_eq!(
            kinds("^ & * : ; . , / ( ) [ ] { }"),
            vec![
                TokenKind::Caret,
                TokenKind::Ampersand,
                TokenKind::Asterisk,
                TokenKind::Colon,
                TokenKind::SemiColon,
                TokenKind::Dot,
                TokenKind::Comma,
                TokenKind::ForwardSlash,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::LeftCurly,
                TokenKind::RightCurly,
            ]
        );
    }

    #[test]
    fn test_two_char_tokens() {
        assert_eq!(
            kinds("== != <= >= ++ -- += -="),
            vec![
                TokenKind::EqualsEquals,
                TokenKind::ExclamationEquals,
                TokenKind::LessThanEquals,
                TokenKind::GreaterThanEquals,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::PlusEquals,
                TokenKind::MinusEquals,
            ]
        );
    }

    #[test]
    fn test_two_char_prefixes_stay_single() {
        assert_eq!(
            kinds("= ! < > + -"),
            vec![
                TokenKind::Equals,
                TokenKind::Exclamation,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::Plus,
                TokenKind::Minus,
            ]
        );
    }

    #[test]
    fn test_keywords_are_plain_identifiers() {
        let tokens = all_tokens("func let const if else while return");
        for (kind, _) in &tokens {
            assert_eq!(*kind, TokenKind::Identifier);
        }
        assert!(tokens[0].1 == "func");
    }

    #[test]
    fn test_lexeme_reproduces_source_slice() {
        let source = "func add(a: int) { return a + 10.5; }";
        let mut lexer = Lexer::new(source);
        loop {
            let token = lexer.next().unwrap();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            let start = token.loc.offset as usize;
            let end = start + token.loc.len as usize;
            assert_eq!(&source[start..end], token.text);
        }
    }

    #[test]
    fn test_peek_is_idempotent_and_matches_next() {
        let mut lexer = Lexer::new("let a = 10;");
        let first = lexer.peek().unwrap();
        let second = lexer.peek().unwrap();
        assert_eq!(first, second);
        assert_eq!(lexer.next().unwrap(), first);
        assert!(lexer.next().unwrap().is_word("a"));
    }

    #[test]
    fn test_string_token_keeps_quotes() {
        let tokens = all_tokens(r#""abc""#);
        assert_eq!(tokens, vec![(TokenKind::String, "\"abc\"".to_string())]);
    }

    #[test]
    fn test_number_rule_is_permissive() {
        // one maximal run of digits and dots; the parser rejects the
        // malformed ones when converting
        let tokens = all_tokens("10 10.10 1.2.3 .5");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Number, "10".to_string()),
                (TokenKind::Number, "10.10".to_string()),
                (TokenKind::Number, "1.2.3".to_string()),
                (TokenKind::Number, ".5".to_string()),
            ]
        );
    }

    #[test]
    fn test_bare_dot_is_dot() {
        assert_eq!(kinds("a.b"), vec![
            TokenKind::Identifier,
            TokenKind::Dot,
            TokenKind::Identifier,
        ]);
    }

    #[test]
    fn test_comment_contributes_only_a_newline() {
        let mut lexer = Lexer::new("// a comment\nx");
        let token = lexer.next().unwrap();
        assert!(token.is_word("x"));
        assert_eq!(token.loc.line, 2);
        assert_eq!(token.loc.col, 1);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let mut lexer = Lexer::new("let a\n  = 10;");
        let let_ = lexer.next().unwrap();
        assert_eq!((let_.loc.line, let_.loc.col), (1, 1));
        let a = lexer.next().unwrap();
        assert_eq!((a.loc.line, a.loc.col), (1, 5));
        let eq = lexer.next().unwrap();
        assert_eq!((eq.loc.line, eq.loc.col), (2, 3));
        let ten = lexer.next().unwrap();
        assert_eq!((ten.loc.line, ten.loc.col), (2, 5));
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut lexer = Lexer::new("");
        assert_eq!(lexer.next().unwrap().kind, TokenKind::EndOfFile);
        assert_eq!(lexer.next().unwrap().kind, TokenKind::EndOfFile);
    }

    #[test]
    fn test_unknown_character_errors_with_location() {
        let mut lexer = Lexer::new("let @");
        lexer.next().unwrap();
        let err = lexer.next().unwrap_err();
        assert!(err.message.contains("unknown character"), "{}", err.message);
        assert_eq!((err.line, err.col), (1, 5));
        assert_eq!(err.to_string(), "1:5: unknown character: '@'");
    }

    #[test]
    fn test_expect_reports_both_kinds() {
        let mut lexer = Lexer::new("10");
        let err = lexer.expect(TokenKind::Identifier).unwrap_err();
        assert!(err.message.contains("expected identifier"), "{}", err.message);
    }

    #[test]
    fn test_test_word_only_matches_identifiers() {
        let mut lexer = Lexer::new("func");
        assert!(lexer.test_word("func").unwrap());
        assert!(!lexer.test_word("let").unwrap());
        let mut lexer = Lexer::new("\"func\"");
        assert!(!lexer.test_word("func").unwrap());
    }
}
