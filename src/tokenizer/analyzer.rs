use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use rust_stemmers::Stemmer;
use stop_words::{get, LANGUAGE};
use unicode_segmentation::UnicodeSegmentation;

use super::language::Language;

/// Tokens longer than this many bytes are dropped by the word-based analyzers
pub const MAX_TOKEN_BYTES: usize = 255;

/// A normalized token and its position in the source text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: u32,
}

impl Token {
    pub fn new(text: impl Into<String>, position: u32) -> Self {
        Self {
            text: text.into(),
            position,
        }
    }
}

/// Turns a text value into a sequence of normalized tokens
pub trait Tokenize {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// The built-in analyzers, selected per field by name when the schema is built.
///
/// | name           | behavior                                              |
/// |----------------|-------------------------------------------------------|
/// | `raw`          | the whole value is one token                          |
/// | `whitespace`   | split on whitespace, no normalization                 |
/// | `default`      | unicode words, lowercased                             |
/// | `<lang>_stem`  | unicode words, lowercased, Snowball stemmed           |
/// | `en_text`      | like `en_stem`, English stopwords removed             |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Analyzer {
    Raw,
    Whitespace,
    Simple,
    Stemming {
        language: Language,
        remove_stopwords: bool,
    },
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::Simple
    }
}

impl Analyzer {
    pub const DEFAULT_NAME: &'static str = "default";

    /// Resolve an analyzer by its registered name
    pub fn from_name(name: &str) -> Option<Analyzer> {
        match name {
            "default" | "simple" => Some(Analyzer::Simple),
            "raw" => Some(Analyzer::Raw),
            "whitespace" => Some(Analyzer::Whitespace),
            "en_text" => Some(Analyzer::Stemming {
                language: Language::English,
                remove_stopwords: true,
            }),
            _ => {
                let lang = name.strip_suffix("_stem")?;
                Language::parse(lang).map(|language| Analyzer::Stemming {
                    language,
                    remove_stopwords: false,
                })
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            Analyzer::Raw => "raw".to_string(),
            Analyzer::Whitespace => "whitespace".to_string(),
            Analyzer::Simple => "default".to_string(),
            Analyzer::Stemming {
                language: Language::English,
                remove_stopwords: true,
            } => "en_text".to_string(),
            Analyzer::Stemming { language, .. } => format!("{}_stem", language.code()),
        }
    }

    /// Whether indexed tokens are lowercased, so query patterns must be too
    pub fn lowercases(&self) -> bool {
        matches!(self, Analyzer::Simple | Analyzer::Stemming { .. })
    }

    fn word_tokens(&self, text: &str, stemmer: Option<&Stemmer>, stopwords: bool) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (pos, word) in text.unicode_words().enumerate() {
            let lowered = word.to_lowercase();
            if lowered.len() > MAX_TOKEN_BYTES {
                continue;
            }
            // Stopwords are dropped but still consume a position
            if stopwords && english_stopwords().contains(&lowered) {
                continue;
            }
            let text = match stemmer {
                Some(stemmer) => stemmer.stem(&lowered).into_owned(),
                None => lowered,
            };
            tokens.push(Token::new(text, pos as u32));
        }
        tokens
    }
}

impl Tokenize for Analyzer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        match self {
            Analyzer::Raw => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Token::new(text, 0)]
                }
            }
            Analyzer::Whitespace => text
                .split_whitespace()
                .enumerate()
                .map(|(pos, word)| Token::new(word, pos as u32))
                .collect(),
            Analyzer::Simple => self.word_tokens(text, None, false),
            Analyzer::Stemming {
                language,
                remove_stopwords,
            } => {
                let stemmer = Stemmer::create(language.algorithm());
                self.word_tokens(text, Some(&stemmer), *remove_stopwords)
            }
        }
    }
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn english_stopwords() -> &'static HashSet<String> {
    static STOPWORDS: OnceLock<HashSet<String>> = OnceLock::new();
    STOPWORDS.get_or_init(|| {
        get(LANGUAGE::English)
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect()
    })
}
