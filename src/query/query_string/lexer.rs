//! Lexer for query string syntax
//!
//! Turns a query string into a stream of tokens. Keywords (`AND`, `OR`,
//! `NOT`, `TO`) are recognized case-insensitively. Positions are character
//! offsets into the input, used in syntax errors.

use crate::error::QueryError;
use crate::query::nodes::MAX_FUZZINESS;

pub(crate) type ParseResult<T> = std::result::Result<T, QueryError>;

/// Token types for query string parsing
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// An unquoted word
    Term(String),
    /// A double-quoted phrase
    QuotedString(String),
    /// A facet path such as `/lang/rust`
    FacetPath(String),
    /// An unquoted word holding `*` or `?`; literal characters keep their
    /// backslash escapes
    Wildcard(String),

    And,
    Or,
    Not,
    /// TO keyword inside ranges; the word "to" anywhere else
    To,
    /// Field separator (field:value)
    Colon,
    /// Match-all, or an open range bound
    Asterisk,
    /// Boost suffix with its value
    Caret(f32),
    /// Fuzzy suffix with its edit distance
    Tilde(u32),

    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,

    /// Required clause
    Plus,
    /// Excluded clause
    Minus,

    /// End of input
    Eof,
}

impl Token {
    /// Whether this token can begin a clause
    pub fn starts_clause(&self) -> bool {
        matches!(
            self,
            Token::Term(_)
                | Token::Wildcard(_)
                | Token::QuotedString(_)
                | Token::FacetPath(_)
                | Token::Asterisk
                | Token::LeftParen
                | Token::Plus
                | Token::Minus
                | Token::Not
                | Token::To
        )
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    /// Where the last returned token started
    token_start: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            token_start: 0,
        }
    }

    /// Start offset of the most recently returned token
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    pub fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_whitespace();
        self.token_start = self.position;

        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };

        match ch {
            ':' => self.single(Token::Colon),
            '*' if self.peek_char().is_some_and(Self::continues_pattern) => self.read_term(),
            '*' => self.single(Token::Asterisk),
            '?' => self.read_term(),
            '[' => self.single(Token::LeftBracket),
            ']' => self.single(Token::RightBracket),
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '^' => {
                self.advance();
                self.read_boost()
            }
            '~' => {
                self.advance();
                self.read_fuzziness()
            }
            '"' => {
                self.advance();
                self.read_quoted_string()
            }
            '/' => Ok(self.read_facet_path()),
            _ if Self::is_term_char(ch) || ch == '\\' => self.read_term(),
            _ => Err(self.error(format!("unexpected character '{}'", ch))),
        }
    }

    fn single(&mut self, token: Token) -> ParseResult<Token> {
        self.advance();
        Ok(token)
    }

    fn read_term(&mut self) -> ParseResult<Token> {
        let mut term = String::new();
        // the same text with escapes kept, for wildcard patterns
        let mut pattern = String::new();
        let mut wildcard = false;
        while let Some(ch) = self.current_char() {
            if ch == '\\' {
                self.advance();
                match self.current_char() {
                    Some(escaped) => {
                        term.push(escaped);
                        if matches!(escaped, '*' | '?' | '\\') {
                            pattern.push('\\');
                        }
                        pattern.push(escaped);
                        self.advance();
                    }
                    None => return Err(self.error("dangling escape at end of query")),
                }
            } else if matches!(ch, '*' | '?') {
                wildcard = true;
                pattern.push(ch);
                self.advance();
            } else if Self::is_term_char(ch) || (!pattern.is_empty() && matches!(ch, '-' | '+' | '/')) {
                term.push(ch);
                pattern.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if wildcard {
            return Ok(Token::Wildcard(pattern));
        }
        match term.to_uppercase().as_str() {
            "AND" => Ok(Token::And),
            "OR" => Ok(Token::Or),
            "NOT" => Ok(Token::Not),
            "TO" => Ok(Token::To),
            _ => Ok(Token::Term(term)),
        }
    }

    fn read_quoted_string(&mut self) -> ParseResult<Token> {
        let mut s = String::new();
        while let Some(ch) = self.current_char() {
            self.advance();
            match ch {
                '"' => return Ok(Token::QuotedString(s)),
                '\\' => {
                    if let Some(escaped) = self.current_char() {
                        s.push(escaped);
                        self.advance();
                    }
                }
                _ => s.push(ch),
            }
        }
        Err(QueryError::Syntax {
            position: self.token_start,
            message: "unterminated quoted string".to_string(),
        })
    }

    fn read_facet_path(&mut self) -> Token {
        let mut path = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']' | '^' | '"') {
                break;
            }
            path.push(ch);
            self.advance();
        }
        Token::FacetPath(path)
    }

    /// `~` alone means the largest distance
    fn read_fuzziness(&mut self) -> ParseResult<Token> {
        let mut digits = String::new();
        while let Some(ch) = self.current_char().filter(char::is_ascii_digit) {
            digits.push(ch);
            self.advance();
        }
        if digits.is_empty() {
            return Ok(Token::Tilde(MAX_FUZZINESS));
        }
        match digits.parse::<u32>() {
            Ok(distance) if distance <= MAX_FUZZINESS => Ok(Token::Tilde(distance)),
            _ => Err(QueryError::Syntax {
                position: self.token_start,
                message: format!("edit distance after '~' must be at most {}", MAX_FUZZINESS),
            }),
        }
    }

    fn read_boost(&mut self) -> ParseResult<Token> {
        let mut digits = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() || ch == '.' {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match digits.parse::<f32>() {
            Ok(boost) if boost.is_finite() && boost >= 0.0 => Ok(Token::Caret(boost)),
            _ => Err(QueryError::Syntax {
                position: self.token_start,
                message: "expected a non-negative number after '^'".to_string(),
            }),
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            position: self.position,
            message: message.into(),
        }
    }

    /// Characters that may appear anywhere in an unquoted term
    fn is_term_char(ch: char) -> bool {
        !ch.is_whitespace()
            && !matches!(
                ch,
                ':' | '"' | '(' | ')' | '[' | ']' | '^' | '*' | '?' | '~' | '\\' | '+' | '-' | '/'
            )
    }

    /// Whether `ch` after a leading `*` makes it part of a pattern
    fn continues_pattern(ch: char) -> bool {
        Self::is_term_char(ch) || matches!(ch, '*' | '?' | '\\')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::Eof {
                break;
            }
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_field_and_range() {
        assert_eq!(
            tokenize("timestamp:[2 TO 10]"),
            vec![
                Token::Term("timestamp".into()),
                Token::Colon,
                Token::LeftBracket,
                Token::Term("2".into()),
                Token::To,
                Token::Term("10".into()),
                Token::RightBracket,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            tokenize("a and b Or not c"),
            vec![
                Token::Term("a".into()),
                Token::And,
                Token::Term("b".into()),
                Token::Or,
                Token::Not,
                Token::Term("c".into()),
            ]
        );
    }

    #[test]
    fn test_prefix_operators_and_inner_dash() {
        assert_eq!(
            tokenize("-draft +e-mail"),
            vec![
                Token::Minus,
                Token::Term("draft".into()),
                Token::Plus,
                Token::Term("e-mail".into()),
            ]
        );
    }

    #[test]
    fn test_phrase_facet_and_boost() {
        assert_eq!(
            tokenize("\"hello \\\"big\\\" world\"^2.5 category:/lang/rust"),
            vec![
                Token::QuotedString("hello \"big\" world".into()),
                Token::Caret(2.5),
                Token::Term("category".into()),
                Token::Colon,
                Token::FacetPath("/lang/rust".into()),
            ]
        );
    }

    #[test]
    fn test_escaped_colon_stays_in_term() {
        assert_eq!(tokenize("a\\:b"), vec![Token::Term("a:b".into())]);
    }

    #[test]
    fn test_wildcards_and_fuzziness() {
        assert_eq!(
            tokenize("title:prog* *ing r?st \\*lit\\? * [* TO 5]"),
            vec![
                Token::Term("title".into()),
                Token::Colon,
                Token::Wildcard("prog*".into()),
                Token::Wildcard("*ing".into()),
                Token::Wildcard("r?st".into()),
                Token::Term("*lit?".into()),
                Token::Asterisk,
                Token::LeftBracket,
                Token::Asterisk,
                Token::To,
                Token::Term("5".into()),
                Token::RightBracket,
            ]
        );
        assert_eq!(
            tokenize("a\\*b* rusk~ elixr~1"),
            vec![
                Token::Wildcard("a\\*b*".into()),
                Token::Term("rusk".into()),
                Token::Tilde(2),
                Token::Term("elixr".into()),
                Token::Tilde(1),
            ]
        );
        let mut lexer = Lexer::new("rust~3");
        lexer.next_token().unwrap();
        assert!(matches!(lexer.next_token(), Err(QueryError::Syntax { position: 4, .. })));
    }

    #[test]
    fn test_errors_carry_positions() {
        let mut lexer = Lexer::new("title:\"open");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token(),
            Err(QueryError::Syntax {
                position: 6,
                message: "unterminated quoted string".to_string()
            })
        );

        let mut lexer = Lexer::new("x^");
        lexer.next_token().unwrap();
        assert!(matches!(lexer.next_token(), Err(QueryError::Syntax { position: 1, .. })));
    }
}
