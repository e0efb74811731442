use crate::frontend::lexer::{LexError, Lexer};
use crate::frontend::token::{Token, TokenKind};

/// Diagnostic printer for the token stream, behind the CLI's `--tokens`.
pub struct TokenDumper {
    pub color: bool,
    /// If false, prints just the lexeme instead of kind + lexeme.
    pub show_kind: bool,
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_kind: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_kind = false;
        self
    }

    /// Lexes `source` from the start and prints one line per token.
    pub fn dump(&self, source: &str) -> Result<(), LexError> {
        let mut lexer = Lexer::new(source);
        loop {
            let token = lexer.next()?;
            self.print_one(&token);
            if token.kind == TokenKind::EndOfFile {
                return Ok(());
            }
        }
    }

    fn print_one(&self, token: &Token<'_>) {
        let color = if self.color {
            self.color_for(token.kind)
        } else {
            ""
        };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_kind {
            println!(
                "[{:02}:{:02}] {}{:<20} {:?}{}",
                token.loc.line,
                token.loc.col,
                color,
                format!("{:?}", token.kind),
                token.text,
                reset
            );
        } else {
            println!(
                "[{:02}:{:02}] {}{}{}",
                token.loc.line, token.loc.col, color, token.text, reset
            );
        }
    }

    fn color_for(&self, kind: TokenKind) -> &'static str {
        match kind {
            TokenKind::Identifier => Self::CYN,
            TokenKind::Number => Self::YEL,
            TokenKind::String => Self::GRN,
            TokenKind::EndOfFile => Self::DIM,
            _ => "",
        }
    }
}
