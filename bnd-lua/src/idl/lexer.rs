//! Tokenizer for declaration files.

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    StringLiteral,
    Number,
    Punct,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::Identifier => "identifier",
            TokenKind::StringLiteral => "string literal",
            TokenKind::Number => "number",
            TokenKind::Punct => "punctuation",
            TokenKind::Eof => "end of input",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
}

const PUNCTUATION: &str = "[]{}();,=:";

/// Split `source` into tokens.  `//` comments are skipped; the stream always
/// ends with one [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line = 1;

    let push = |tokens: &mut Vec<Token>, kind, value: &str, line| {
        tokens.push(Token {
            kind,
            value: value.to_string(),
            line,
        })
    };

    while let Some(&(i, c)) = chars.peek() {
        if c == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '/' && source[i + 1..].starts_with('/') {
            while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            continue;
        }
        if c == '"' {
            let start_line = line;
            chars.next();
            let start = i + 1;
            let mut end = None;
            for (j, c) in chars.by_ref() {
                match c {
                    '"' => {
                        end = Some(j);
                        break;
                    }
                    '\n' => line += 1,
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| ParseError::new(start_line, "unterminated string literal"))?;
            push(&mut tokens, TokenKind::StringLiteral, &source[start..end], start_line);
            continue;
        }
        let negative_number = c == '-' && source[i + 1..].starts_with(|n: char| n.is_ascii_digit());
        if c.is_ascii_digit() || negative_number {
            chars.next();
            let mut end = i + c.len_utf8();
            while let Some((j, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                end = j + d.len_utf8();
            }
            push(&mut tokens, TokenKind::Number, &source[i..end], line);
            continue;
        }
        if PUNCTUATION.contains(c) {
            chars.next();
            push(&mut tokens, TokenKind::Punct, &source[i..i + 1], line);
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            chars.next();
            let mut end = i + c.len_utf8();
            while let Some((j, d)) = chars.next_if(|&(_, d)| d.is_alphanumeric() || d == '_') {
                end = j + d.len_utf8();
            }
            push(&mut tokens, TokenKind::Identifier, &source[i..end], line);
            continue;
        }
        return Err(ParseError::new(line, format!("unexpected character '{c}'")));
    }

    push(&mut tokens, TokenKind::Eof, "", line);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn negative_numbers_and_punctuation() {
        let toks = kinds("x = -12;");
        assert_eq!(
            toks,
            vec![
                (TokenKind::Identifier, "x".to_string()),
                (TokenKind::Punct, "=".to_string()),
                (TokenKind::Number, "-12".to_string()),
                (TokenKind::Punct, ";".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let toks = tokenize("// header\nfoo // trailing\n\"bar\"").unwrap();
        assert_eq!(toks[0].value, "foo");
        assert_eq!(toks[0].line, 2);
        assert_eq!(toks[1].kind, TokenKind::StringLiteral);
        assert_eq!(toks[1].value, "bar");
        assert_eq!(toks[1].line, 3);
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("\n\"open").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn unexpected_character() {
        let err = tokenize("a @ b").unwrap_err();
        assert!(err.message.contains('@'), "got: {err}");
    }
}
