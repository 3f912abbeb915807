//! Tokenizer for descriptor scripts.
//!
//! An identifier is any run of characters that are neither blank nor
//! punctuation, so names holding non-ASCII text or control bytes are kept as
//! written.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    /// Numeric literal kept as written; the parser decides int vs float.
    Number(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Eq,
    Dot,
    ColonColon,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::Str(s) => format!("string \"{s}\""),
            TokenKind::Number(s) => format!("number {s}"),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::LBrace => "'{'".into(),
            TokenKind::RBrace => "'}'".into(),
            TokenKind::LBracket => "'['".into(),
            TokenKind::RBracket => "']'".into(),
            TokenKind::Semicolon => "';'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Eq => "'='".into(),
            TokenKind::Dot => "'.'".into(),
            TokenKind::ColonColon => "'::'".into(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

const PUNCTUATION: &[char] = &['(', ')', '{', '}', '[', ']', ';', ',', '=', '.', ':', '"'];

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_ident_char(c: char) -> bool {
    !is_blank(c) && !PUNCTUATION.contains(&c)
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, ScriptError> {
        self.skip_blanks_and_comments()?;

        let (line, column) = (self.line, self.column);
        let Some((pos, c)) = self.advance() else {
            return Ok(Token::new(TokenKind::Eof, line, column));
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Eq,
            '.' => TokenKind::Dot,
            ':' => {
                if self.match_char(':') {
                    TokenKind::ColonColon
                } else {
                    return Err(ScriptError::UnexpectedChar { ch: ':', line, column });
                }
            }
            '"' => self.string(line, column)?,
            '-' if self.peek().is_some_and(|n| n.is_ascii_digit() || n == '.') => {
                self.number(pos)
            }
            c if c.is_ascii_digit() => self.number(pos),
            c if is_ident_char(c) => self.identifier(pos),
            c => return Err(ScriptError::UnexpectedChar { ch: c, line, column }),
        };

        Ok(Token::new(kind, line, column))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, c)) = result {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(pos, _)| *pos)
            .unwrap_or(self.source.len())
    }

    fn skip_blanks_and_comments(&mut self) -> Result<(), ScriptError> {
        loop {
            match self.peek() {
                Some(c) if is_blank(c) => {
                    self.advance();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some((_, '*')) if self.match_char('/') => break,
                            Some(_) => {}
                            None => return Err(ScriptError::UnterminatedComment { line, column }),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<TokenKind, ScriptError> {
        let mut value = String::new();
        loop {
            match self.advance() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\'')) => value.push('\''),
                    Some((_, c)) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => return Err(ScriptError::UnterminatedString { line, column }),
                },
                Some((_, c)) => value.push(c),
                None => return Err(ScriptError::UnterminatedString { line, column }),
            }
        }
        Ok(TokenKind::Str(value))
    }

    fn number(&mut self, start: usize) -> TokenKind {
        let mut prev = None;
        while let Some(c) = self.peek() {
            let exponent_sign = matches!(c, '+' | '-') && matches!(prev, Some('e' | 'E'));
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E') || exponent_sign {
                self.advance();
                prev = Some(c);
            } else {
                break;
            }
        }
        let end = self.offset();
        TokenKind::Number(self.source[start..end].to_string())
    }

    fn identifier(&mut self, start: usize) -> TokenKind {
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.offset();
        TokenKind::Ident(self.source[start..end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn method_call_tokens() {
        assert_eq!(
            kinds("%this.addSequence(\"a b\", 0, -1);"),
            vec![
                TokenKind::Ident("%this".into()),
                TokenKind::Dot,
                TokenKind::Ident("addSequence".into()),
                TokenKind::LParen,
                TokenKind::Str("a b".into()),
                TokenKind::Comma,
                TokenKind::Number("0".into()),
                TokenKind::Comma,
                TokenKind::Number("-1".into()),
                TokenKind::RParen,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn identifiers_keep_control_and_non_ascii_chars() {
        let name = "Miku_\u{f9}\u{d4}C\u{b}\u{1}_0";
        assert_eq!(
            kinds(&format!("Material({name})"))[2],
            TokenKind::Ident(name.to_string())
        );
    }

    #[test]
    fn comments_and_namespaces() {
        assert_eq!(
            kinds("// header\nfunction A::onLoad // trailing\n"),
            vec![
                TokenKind::Ident("function".into()),
                TokenKind::Ident("A".into()),
                TokenKind::ColonColon,
                TokenKind::Ident("onLoad".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn block_comments_are_skipped() {
        assert_eq!(
            kinds("/* header\n ** note */ a /**/ = /* x */ \"b\";"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Str("b".into()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
        let tokens = Lexer::new("/* one\ntwo */ x").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (2, 8));
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        let err = Lexer::new("a /* open").tokenize().unwrap_err();
        assert_eq!(err, ScriptError::UnterminatedComment { line: 1, column: 3 });
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("x = \"abc").tokenize().unwrap_err();
        assert_eq!(err, ScriptError::UnterminatedString { line: 1, column: 5 });
    }

    #[test]
    fn single_colon_is_rejected() {
        assert!(Lexer::new("a:b").tokenize().is_err());
    }
}
