//! Tokenizer for the textual quadruple IR format.
//!
//! One token kind per lexical class the grammar in `parser.rs` needs: bare
//! identifiers double as opcode mnemonics, block/function keywords, and
//! (via the leading-character convention `t0`/`L0`) temp and label
//! references, exactly as `Instruction`'s table in `spec.md` §3 names them.
//! Modeled on `cranelift-reader`'s own lexer in spirit — a `Vec<char>`
//! scan with a single lookahead — but far smaller, since this format has no
//! floating-point literals, no hexadecimal immediates, and no nested
//! comments.

use crate::{Location, ParseError, ParseResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Percent(String),
    At(String),
    IntLit(i64),
    Dash,
    Comma,
    Colon,
    Equals,
    Arrow,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eof,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            chars: src.char_indices().peekable(),
            src,
            line: 1,
        }
    }

    fn loc(&self) -> Location {
        Location { line_number: self.line }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(&(_, c)) if c == '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(&(_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some(&(_, ';')) => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => break,
            }
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        &self.src[start..end]
    }

    /// Pull the next token, or a lexical error (only an unrecognized
    /// character can produce one; everything else is a parser-level error).
    pub fn next_token(&mut self) -> ParseResult<(Token, Location)> {
        self.skip_trivia();
        let loc = self.loc();
        let Some(&(start, c)) = self.chars.peek() else {
            return Ok((Token::Eof, loc));
        };

        if c.is_ascii_alphabetic() || c == '_' {
            self.chars.next();
            let text = self.take_while(start, |c| c.is_ascii_alphanumeric() || c == '_');
            return Ok((Token::Ident(text.to_string()), loc));
        }
        if c == '%' {
            self.chars.next();
            let Some(&(name_start, _)) = self.chars.peek() else {
                return err!(loc, "expected a name after '%'");
            };
            let text = self.take_while(name_start, |c| c.is_ascii_alphanumeric() || c == '_');
            if text.is_empty() {
                return err!(loc, "expected a name after '%'");
            }
            return Ok((Token::Percent(text.to_string()), loc));
        }
        if c == '@' {
            self.chars.next();
            let Some(&(name_start, _)) = self.chars.peek() else {
                return err!(loc, "expected a name after '@'");
            };
            let text = self.take_while(name_start, |c| c.is_ascii_alphanumeric() || c == '_');
            if text.is_empty() {
                return err!(loc, "expected a name after '@'");
            }
            return Ok((Token::At(text.to_string()), loc));
        }
        if c.is_ascii_digit() {
            self.chars.next();
            let text = self.take_while(start, |c| c.is_ascii_digit());
            let v: i64 = text.parse().map_err(|_| ParseError { location: loc, message: format!("integer literal out of range: {text}") })?;
            return Ok((Token::IntLit(v), loc));
        }
        if c == '-' {
            self.chars.next();
            if matches!(self.chars.peek(), Some(&(_, d)) if d.is_ascii_digit()) {
                let Some(&(digit_start, _)) = self.chars.peek() else { unreachable!() };
                let text = self.take_while(digit_start, |c| c.is_ascii_digit());
                let v: i64 = format!("-{text}").parse().map_err(|_| ParseError { location: loc, message: format!("integer literal out of range: -{text}") })?;
                return Ok((Token::IntLit(v), loc));
            }
            if matches!(self.chars.peek(), Some(&(_, '>'))) {
                self.chars.next();
                return Ok((Token::Arrow, loc));
            }
            return Ok((Token::Dash, loc));
        }

        self.chars.next();
        let tok = match c {
            ',' => Token::Comma,
            ':' => Token::Colon,
            '=' => Token::Equals,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            other => return err!(loc, "unexpected character '{}'", other),
        };
        Ok((tok, loc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let (tok, _) = lexer.next_token().unwrap();
            if tok == Token::Eof {
                break;
            }
            out.push(tok);
        }
        out
    }

    #[test]
    fn lexes_an_instruction_line() {
        let toks = all_tokens("ADD t0, t1, t2 ; sum\nRETURN -, -, t2");
        assert_eq!(
            toks,
            vec![
                Token::Ident("ADD".into()),
                Token::Ident("t0".into()),
                Token::Comma,
                Token::Ident("t1".into()),
                Token::Comma,
                Token::Ident("t2".into()),
                Token::Ident("RETURN".into()),
                Token::Dash,
                Token::Comma,
                Token::Dash,
                Token::Comma,
                Token::Ident("t2".into()),
            ]
        );
    }

    #[test]
    fn lexes_negative_literal_and_variable() {
        let toks = all_tokens("ASSIGN -3, -, %x:i32");
        assert_eq!(
            toks,
            vec![
                Token::Ident("ASSIGN".into()),
                Token::IntLit(-3),
                Token::Comma,
                Token::Dash,
                Token::Comma,
                Token::Percent("x".into()),
                Token::Colon,
                Token::Ident("i32".into()),
            ]
        );
    }

    #[test]
    fn arrow_is_distinct_from_dash() {
        let toks = all_tokens("-> -");
        assert_eq!(toks, vec![Token::Arrow, Token::Dash]);
    }
}
