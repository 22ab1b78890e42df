// ==========================================
// 内容同步系统 - 公式语法分析
// ==========================================
// 语法:
//   expr      := call | literal | field_ref
//   call      := IDENT '(' [expr (',' expr)*] ')'
//   literal   := STRING | NUMBER | true | false | null
//   field_ref := IDENT | field(IDENT | STRING)
// 函数在编译期解析并绑定，求值时不再查表
// ==========================================

use crate::domain::content::RawRecord;
use crate::engine::formula::error::{FormulaError, FormulaResult, FunctionError};
use crate::engine::formula::functions::{FormulaFunction, FormulaValue, FunctionResolver};
use crate::engine::formula::lexer::{tokenize, Token, TokenKind};
use std::fmt;
use std::sync::Arc;

/// 源字段引用的内置特殊形式
const FIELD_FORM: &str = "field";

// ==========================================
// Expr - 表达式树
// ==========================================
#[derive(Clone)]
pub(crate) enum Expr {
    Literal(FormulaValue),
    Field(String),
    Call {
        function: Arc<dyn FormulaFunction>,
        args: Vec<Expr>,
    },
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "Literal({:?})", value),
            Expr::Field(name) => write!(f, "Field({})", name),
            Expr::Call { function, args } => {
                write!(f, "Call({}, {:?})", function.name(), args)
            }
        }
    }
}

impl Expr {
    /// 对单条源记录求值，缺失的源字段视为 Null
    pub(crate) fn evaluate(&self, record: &RawRecord) -> Result<FormulaValue, FunctionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(name) => Ok(record
                .get(name)
                .map(FormulaValue::text)
                .unwrap_or(FormulaValue::Null)),
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(record))
                    .collect::<Result<Vec<_>, _>>()?;
                function.call(values)
            }
        }
    }
}

// ==========================================
// Parser - 递归下降
// ==========================================
struct Parser<'a> {
    field: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    resolver: &'a dyn FunctionResolver,
}

impl<'a> Parser<'a> {
    fn syntax(&self, position: usize, message: impl Into<String>) -> FormulaError {
        FormulaError::Syntax {
            field: self.field.to_string(),
            position,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> FormulaResult<()> {
        let position = self.position();
        match self.next() {
            Some(token) if token.kind == expected => Ok(()),
            _ => Err(self.syntax(position, format!("期望 {}", what))),
        }
    }

    fn parse_expr(&mut self) -> FormulaResult<Expr> {
        let position = self.position();
        let token = self
            .next()
            .ok_or_else(|| self.syntax(position, "表达式不完整"))?;

        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(FormulaValue::Text(s))),
            TokenKind::Number(n) => Ok(Expr::Literal(FormulaValue::Number(n))),
            TokenKind::Ident(ident) => {
                if self.peek() == Some(&TokenKind::LParen) {
                    self.pos += 1;
                    self.parse_call(ident)
                } else {
                    Ok(match ident.to_lowercase().as_str() {
                        "true" => Expr::Literal(FormulaValue::Bool(true)),
                        "false" => Expr::Literal(FormulaValue::Bool(false)),
                        "null" => Expr::Literal(FormulaValue::Null),
                        _ => Expr::Field(ident),
                    })
                }
            }
            _ => Err(self.syntax(token.position, "此处不能出现该符号")),
        }
    }

    /// 已消费 IDENT '('
    fn parse_call(&mut self, name: String) -> FormulaResult<Expr> {
        if name.eq_ignore_ascii_case(FIELD_FORM) {
            let arg_position = self.position();
            let field = match self.next().map(|t| t.kind) {
                Some(TokenKind::Ident(s)) | Some(TokenKind::Str(s)) => s,
                _ => return Err(self.syntax(arg_position, "field() 需要一个字段名")),
            };
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Expr::Field(field));
        }

        let function = self
            .resolver
            .resolve(&name)
            .ok_or_else(|| FormulaError::UnknownFunction {
                field: self.field.to_string(),
                name: name.clone(),
            })?;

        let mut args = Vec::new();
        if self.peek() == Some(&TokenKind::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_expr()?);
                let sep_position = self.position();
                match self.next().map(|t| t.kind) {
                    Some(TokenKind::Comma) => continue,
                    Some(TokenKind::RParen) => break,
                    _ => return Err(self.syntax(sep_position, "期望 ',' 或 ')'")),
                }
            }
        }

        let arity = function.arity();
        if !arity.accepts(args.len()) {
            return Err(FormulaError::Arity {
                field: self.field.to_string(),
                name,
                expected: arity.to_string(),
                actual: args.len(),
            });
        }

        Ok(Expr::Call { function, args })
    }
}

/// 编译单个公式
pub(crate) fn parse(field: &str, text: &str, resolver: &dyn FunctionResolver) -> FormulaResult<Expr> {
    let tokens = tokenize(field, text)?;
    let mut parser = Parser {
        field,
        tokens,
        pos: 0,
        end: text.chars().count(),
        resolver,
    };

    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        let position = parser.position();
        return Err(parser.syntax(position, "公式末尾存在多余内容"));
    }
    Ok(expr)
}
