use crate::error::{CompileError, CompileResult};

/// Lexical tokens. Keywords are plain identifiers here; the parser decides
/// keyword-ness case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    /// Raw numeric text, converted to a number when lowered
    Number(String),
    String(String),
    /// `?`
    Positional,
    /// `:name`
    Named(String),

    // Operators
    Equal,         // =
    NotEqual,      // != or <>
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    Plus,          // +
    Minus,         // -
    Star,          // *
    Slash,         // /

    // Delimiters
    Comma,      // ,
    Dot,        // .
    LeftParen,  // (
    RightParen, // )
    Semicolon,  // ;

    Eof,
}

impl Token {
    /// True when this is an identifier spelling `keyword`, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Identifier(name) if name.eq_ignore_ascii_case(keyword))
    }
}

/// A token together with the character offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

/// Lazy tokenizer with a single token of lookahead.
pub struct SqlLexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
    peeked: Option<SpannedToken>,
}

impl SqlLexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
            peeked: None,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current_char {
            self.advance();
            if ch == '\n' {
                break;
            }
        }
    }

    // An unterminated block comment swallows the rest of the input.
    fn skip_block_comment(&mut self) {
        self.advance(); // skip /
        self.advance(); // skip *
        while let Some(ch) = self.current_char {
            if ch == '*' && self.peek_char() == Some('/') {
                self.advance();
                self.advance();
                break;
            }
            self.advance();
        }
    }

    fn read_number(&mut self) -> Token {
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::Number(num_str)
    }

    fn read_string(&mut self, start: usize) -> CompileResult<Token> {
        let quote = self.current_char.unwrap_or('\'');
        self.advance(); // skip opening quote

        let mut string = String::new();

        while let Some(ch) = self.current_char {
            if ch == quote {
                // Doubled quote stands for a literal quote
                if self.peek_char() == Some(quote) {
                    string.push(quote);
                    self.advance();
                    self.advance();
                } else {
                    self.advance();
                    return Ok(Token::String(string));
                }
            } else if ch == '\\' {
                self.advance();
                if let Some(escaped) = self.current_char {
                    string.push(escaped);
                    self.advance();
                }
            } else {
                string.push(ch);
                self.advance();
            }
        }

        Err(CompileError::Parse(format!(
            "Unterminated string literal starting at position {}",
            start
        )))
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        ident
    }

    fn read_named_parameter(&mut self, start: usize) -> CompileResult<Token> {
        self.advance(); // skip :
        match self.current_char {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                Ok(Token::Named(self.read_identifier()))
            }
            _ => Err(CompileError::Lex {
                ch: ':',
                position: start,
            }),
        }
    }

    fn lex(&mut self) -> CompileResult<SpannedToken> {
        loop {
            self.skip_whitespace();

            match self.current_char {
                Some('-') if self.peek_char() == Some('-') => self.skip_line_comment(),
                Some('/') if self.peek_char() == Some('*') => self.skip_block_comment(),
                _ => break,
            }
        }

        let start = self.position;
        let token = match self.current_char {
            None => Token::Eof,

            Some(ch) if ch.is_ascii_digit() => self.read_number(),

            Some('\'') | Some('"') => self.read_string(start)?,

            Some(ch) if ch.is_alphabetic() || ch == '_' => Token::Identifier(self.read_identifier()),

            Some('?') => {
                self.advance();
                Token::Positional
            }
            Some(':') => self.read_named_parameter(start)?,

            Some('!') if self.peek_char() == Some('=') => {
                self.advance();
                self.advance();
                Token::NotEqual
            }
            Some('<') => {
                self.advance();
                match self.current_char {
                    Some('=') => {
                        self.advance();
                        Token::LessThanEq
                    }
                    Some('>') => {
                        self.advance();
                        Token::NotEqual
                    }
                    _ => Token::LessThan,
                }
            }
            Some('>') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::GreaterThanEq
                } else {
                    Token::GreaterThan
                }
            }

            Some(ch) => {
                let token = match ch {
                    '=' => Token::Equal,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    ';' => Token::Semicolon,
                    _ => return Err(CompileError::Lex { ch, position: start }),
                };
                self.advance();
                token
            }
        };

        tracing::trace!(?token, position = start, "lexed token");
        Ok(SpannedToken {
            token,
            position: start,
        })
    }

    /// Returns the next token, or `Token::Eof` once the input is exhausted.
    pub fn next_token(&mut self) -> CompileResult<SpannedToken> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lex(),
        }
    }

    /// Returns the upcoming token without consuming it.
    pub fn peek_token(&mut self) -> CompileResult<&SpannedToken> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.lex()?,
        };
        let token: &SpannedToken = self.peeked.insert(token);
        Ok(token)
    }

    pub fn tokenize(&mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?.token;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }
}
