//! Tokenizer for X DevAPI expressions

use winnow::ascii::digit1;
use winnow::combinator::{alt, delimited, opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use super::ParseError;

type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Bare word: identifier or keyword (keywords are matched case-insensitively)
    Ident(String),
    /// Backtick-quoted identifier, never a keyword
    Quoted(String),
    /// Integer literal as decimal text (hex is converted)
    Int(String),
    Float(f64),
    Str(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Longest spellings first.
const SYMBOLS: &[&str] = &[
    "->>", "->", "**", "&&", "||", "<<", ">>", "<=", ">=", "<>", "!=", "==", "=", "<", ">", "!",
    "~", "+", "-", "*", "/", "%", "&", "|", "^", "(", ")", "[", "]", "{", "}", ",", ".", ":", "$",
    "@", "?",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut input = source;
    let mut tokens = Vec::new();
    loop {
        input = input.trim_start();
        if input.is_empty() {
            return Ok(tokens);
        }
        let start = source.len() - input.len();
        match token.parse_next(&mut input) {
            Ok(token) => tokens.push(Spanned {
                token,
                start,
                end: source.len() - input.len(),
            }),
            Err(_) => {
                let found = input.chars().next().map(String::from).unwrap_or_default();
                let expected = match found.as_str() {
                    "'" | "\"" => "a closing quote",
                    "`" => "a closing backtick",
                    _ => "a token",
                };
                return Err(ParseError::new(start, found, expected));
            }
        }
    }
}

fn token(input: &mut &str) -> PResult<Token> {
    alt((
        hex_lit,
        number,
        string_lit.map(Token::Str),
        quoted_ident.map(Token::Quoted),
        word.map(|w| Token::Ident(w.to_string())),
        symbol.map(Token::Symbol),
    ))
    .parse_next(input)
}

fn hex_lit(input: &mut &str) -> PResult<Token> {
    preceded(
        alt(("0x", "0X")),
        take_while(1.., |c: char| c.is_ascii_hexdigit()),
    )
    .try_map(|digits: &str| u128::from_str_radix(digits, 16))
    .map(|n| Token::Int(n.to_string()))
    .parse_next(input)
}

fn number(input: &mut &str) -> PResult<Token> {
    let text = (
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ErrMode::Backtrack(ContextError::new()))
    } else {
        Ok(Token::Int(text.to_string()))
    }
}

fn word<'a>(input: &mut &'a str) -> PResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn quoted_ident(input: &mut &str) -> PResult<String> {
    delimited('`', take_till(0.., '`'), '`')
        .map(str::to_string)
        .parse_next(input)
}

fn symbol(input: &mut &str) -> PResult<&'static str> {
    for sym in SYMBOLS {
        if input.starts_with(sym) {
            *input = &input[sym.len()..];
            return Ok(sym);
        }
    }
    Err(ErrMode::Backtrack(ContextError::new()))
}

fn string_lit(input: &mut &str) -> PResult<String> {
    alt((
        delimited('"', string_contents('"'), '"'),
        delimited('\'', string_contents('\''), '\''),
    ))
    .parse_next(input)
}

/// Backslash escapes, plus SQL-style doubled quotes (`'it''s'`).
fn string_contents<'a>(quote: char) -> impl FnMut(&mut &'a str) -> PResult<String> {
    move |input: &mut &'a str| {
        let mut result = String::new();
        loop {
            let Some(c) = input.chars().next() else {
                return Err(ErrMode::Backtrack(ContextError::new()));
            };
            if c == quote {
                if input[c.len_utf8()..].starts_with(quote) {
                    result.push(quote);
                    *input = &input[2 * c.len_utf8()..];
                    continue;
                }
                break;
            } else if c == '\\' {
                *input = &input[1..];
                let Some(escaped) = input.chars().next() else {
                    return Err(ErrMode::Backtrack(ContextError::new()));
                };
                let unescaped = match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    _ => escaped,
                };
                result.push(unescaped);
                *input = &input[escaped.len_utf8()..];
            } else {
                result.push(c);
                *input = &input[c.len_utf8()..];
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn symbols_prefer_longest_spelling() {
        assert_eq!(
            tokens("a->>'$.x' <> b"),
            vec![
                Token::Ident("a".into()),
                Token::Symbol("->>"),
                Token::Str("$.x".into()),
                Token::Symbol("<>"),
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokens("12 1.5 2e3 0x1F"),
            vec![
                Token::Int("12".into()),
                Token::Float(1.5),
                Token::Float(2000.0),
                Token::Int("31".into()),
            ]
        );
    }

    #[test]
    fn doubled_quotes_and_escapes() {
        assert_eq!(tokens(r"'it''s\n'"), vec![Token::Str("it's\n".into())]);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let spanned = tokenize("  ab  :x").unwrap();
        assert_eq!((spanned[0].start, spanned[0].end), (2, 4));
        assert_eq!((spanned[1].start, spanned[2].start), (6, 7));
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("a = 'oops").unwrap_err();
        assert_eq!(err.offset, 4);
        assert_eq!(err.expected, "a closing quote");
    }
}
