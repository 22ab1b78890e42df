// ==========================================
// 内容同步系统 - 公式词法分析
// ==========================================
// 记号: 标识符 / 字符串 / 数值 / ( ) ,
// ==========================================

use crate::engine::formula::error::{FormulaError, FormulaResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize, // 字符位置（从 0 开始）
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// 将公式文本切分为记号
pub(crate) fn tokenize(field: &str, text: &str) -> FormulaResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |position: usize, message: String| FormulaError::Syntax {
        field: field.to_string(),
        position,
        message,
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, position: i });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, position: i });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, position: i });
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax(start, "字符串未闭合".to_string())),
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| syntax(i, "转义符后缺少字符".to_string()))?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token { kind: TokenKind::Str(value), position: start });
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| syntax(start, format!("无法解析的数值: {}", literal)))?;
                tokens.push(Token { kind: TokenKind::Number(number), position: start });
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_part(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(Token { kind: TokenKind::Ident(ident), position: start });
            }
            other => return Err(syntax(i, format!("非法字符: '{}'", other))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize("f", text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_call() {
        assert_eq!(
            kinds("concat(first_name, ' ', \"x\\\"y\", 42)"),
            vec![
                TokenKind::Ident("concat".to_string()),
                TokenKind::LParen,
                TokenKind::Ident("first_name".to_string()),
                TokenKind::Comma,
                TokenKind::Str(" ".to_string()),
                TokenKind::Comma,
                TokenKind::Str("x\"y".to_string()),
                TokenKind::Comma,
                TokenKind::Number(42.0),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_negative_number_and_dotted_ident() {
        assert_eq!(
            kinds("substring(mail.address, -3)"),
            vec![
                TokenKind::Ident("substring".to_string()),
                TokenKind::LParen,
                TokenKind::Ident("mail.address".to_string()),
                TokenKind::Comma,
                TokenKind::Number(-3.0),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("name", "upper('abc").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { position: 6, .. }));
    }

    #[test]
    fn test_illegal_character() {
        assert!(tokenize("name", "a + b").is_err());
    }
}
