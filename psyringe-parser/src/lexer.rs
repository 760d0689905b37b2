//! Lexer for PowerShell-style scripts using logos

use logos::{FilterResult, Lexer as LogosLexer, Logos};
use psyringe_core::ast::Span;

use crate::error::ParseError;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"([ \t\r\f]+|#[^\n]*|`\r?\n)")]
pub enum Token<'a> {
    /// `<# ... #>`, skipped by its callback and never emitted
    #[token("<#", block_comment)]
    BlockComment,

    // Variables
    #[regex(r"\$[A-Za-z0-9_]+(:[A-Za-z0-9_]+)?", |lex| &lex.slice()[1..])]
    #[regex(r"\$[?^$]", |lex| &lex.slice()[1..])]
    #[regex(r"\$\{[^}]+\}", |lex| { let s = lex.slice(); &s[2..s.len() - 1] })]
    Variable(&'a str),

    #[regex(r"@[A-Za-z_][A-Za-z0-9_]*", |lex| &lex.slice()[1..])]
    Splat(&'a str),

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?([dDlL]|[kKmMgGtTpP][bB])?", |lex| lex.slice())]
    #[regex(r"0[xX][0-9a-fA-F]+[lL]?", |lex| lex.slice())]
    Number(&'a str),

    #[regex(r"'([^']|'')*'", |lex| unquote_single(lex.slice()))]
    SingleQuoted(String),

    #[regex(r#""([^"`]|`[^\n]|`\n|"")*""#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    DoubleQuoted(&'a str),

    #[token("@'", |lex| here_string(lex, "\n'@"))]
    SingleHereString(&'a str),

    #[token("@\"", |lex| here_string(lex, "\n\"@"))]
    DoubleHereString(&'a str),

    // Names
    #[regex(r"[A-Za-z_][A-Za-z0-9_\-]*", |lex| lex.slice())]
    Word(&'a str),

    /// `-Name`, `-eq`, `-Name:` (the slice, dash included)
    #[regex(r"-[A-Za-z_][A-Za-z0-9_]*:?", |lex| lex.slice())]
    DashWord(&'a str),

    // Delimiters
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("$(")]
    DollarParen,

    #[token("@(")]
    AtParen,

    #[token("@{")]
    AtBrace,

    // Punctuation
    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,

    #[token("\n")]
    Newline,

    #[token(".")]
    Dot,

    #[token("..")]
    DotDot,

    #[token("::")]
    ColonColon,

    #[token(":")]
    Colon,

    #[token("?")]
    Question,

    #[token("?.")]
    QuestionDot,

    #[token("?[")]
    QuestionBracket,

    #[token("|")]
    Pipe,

    #[token("&")]
    Ampersand,

    #[token("\\")]
    Backslash,

    // Operators
    #[token("=")]
    Assign,

    #[token("+=")]
    PlusAssign,

    #[token("-=")]
    MinusAssign,

    #[token("*=")]
    StarAssign,

    #[token("/=")]
    SlashAssign,

    #[token("%=")]
    PercentAssign,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("!")]
    Bang,

    #[token("++")]
    PlusPlus,

    #[token("--")]
    MinusMinus,
}

impl<'a> Token<'a> {
    /// Human readable form used in error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Variable(name) => format!("variable ${}", name),
            Token::Splat(name) => format!("splat @{}", name),
            Token::Number(text) => format!("number {}", text),
            Token::SingleQuoted(_) | Token::DoubleQuoted(_) => "string".to_string(),
            Token::SingleHereString(_) | Token::DoubleHereString(_) => "here-string".to_string(),
            Token::Word(word) => format!("'{}'", word),
            Token::DashWord(word) => format!("'{}'", word),
            Token::Newline => "newline".to_string(),
            other => format!("'{}'", other.punctuation()),
        }
    }

    fn punctuation(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::DollarParen => "$(",
            Token::AtParen => "@(",
            Token::AtBrace => "@{",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::DotDot => "..",
            Token::ColonColon => "::",
            Token::Colon => ":",
            Token::Question => "?",
            Token::QuestionDot => "?.",
            Token::QuestionBracket => "?[",
            Token::Pipe => "|",
            Token::Ampersand => "&",
            Token::Backslash => "\\",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            _ => "",
        }
    }
}

/// Strips the quotes of a single-quoted string and collapses doubled quotes
#[doc(hidden)]
pub fn unquote_single(s: &str) -> String {
    s[1..s.len() - 1].replace("''", "'")
}

fn block_comment<'a>(lex: &mut LogosLexer<'a, Token<'a>>) -> FilterResult<(), ()> {
    match lex.remainder().find("#>") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(())
        }
    }
}

/// Consumes a here-string body. The opener must end its line and the closer must start one.
fn here_string<'a>(lex: &mut LogosLexer<'a, Token<'a>>, closer: &str) -> Option<&'a str> {
    let rest: &'a str = lex.remainder();
    let header_end = rest.find('\n')?;
    if !rest[..header_end].trim().is_empty() {
        return None;
    }

    let body = &rest[header_end..];
    let end = body.find(closer)?;
    let content = if end == 0 { "" } else { &body[1..end] };
    let content = content.strip_suffix('\r').unwrap_or(content);

    lex.bump(header_end + end + closer.len());
    Some(content)
}

pub struct Lexer<'a> {
    inner: LogosLexer<'a, Token<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Lexes the whole source, failing on the first invalid token
    pub fn tokenize(self) -> Result<Vec<(Token<'a>, Span)>, ParseError> {
        self.collect()
    }

    /// Lexes the whole source, dropping invalid tokens and reporting them separately
    pub fn tokenize_lossy(self) -> (Vec<(Token<'a>, Span)>, Vec<ParseError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        for result in self {
            match result {
                Ok(token) => tokens.push(token),
                Err(err) => errors.push(err),
            }
        }
        (tokens, errors)
    }

    fn error_at(&self, span: Span) -> ParseError {
        let text = self.inner.slice();
        let delimiter = ["<#", "@'", "@\"", "'", "\""]
            .into_iter()
            .find(|d| text.starts_with(d));
        match delimiter {
            Some(delimiter) => ParseError::UnclosedDelimiter {
                delimiter: delimiter.to_string(),
                position: span.start,
            },
            None => ParseError::InvalidToken {
                position: span.start,
                text: text.to_string(),
            },
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<(Token<'a>, Span), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next()?;
        let range = self.inner.span();
        let span = Span::new(range.start, range.end);
        Some(match result {
            Ok(token) => Ok((token, span)),
            Err(()) => Err(self.error_at(span)),
        })
    }
}

#[cfg(test)]
#[path = "lexer_tests.rs"]
mod tests;
