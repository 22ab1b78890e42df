// ==========================================
// 内容同步系统 - 公式函数注册表
// ==========================================
// 职责: 公式值类型、函数接口、按名称解析（大小写不敏感）
// 说明: 插件函数的发现与生命周期不在本模块，
//       外部加载器只需把函数注册进 StandardFunctions
// ==========================================

use crate::engine::formula::error::FunctionError;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

// ==========================================
// FormulaValue - 公式值
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Null,
    Text(String),
    Bool(bool),
    Number(f64),
    List(Vec<FormulaValue>),
}

impl FormulaValue {
    pub fn text(value: impl Into<String>) -> Self {
        FormulaValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FormulaValue::Null)
    }

    /// 空值判定: Null / 空白字符串 / 空列表
    pub fn is_empty(&self) -> bool {
        match self {
            FormulaValue::Null => true,
            FormulaValue::Text(s) => s.trim().is_empty(),
            FormulaValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            FormulaValue::Null => false,
            FormulaValue::Bool(b) => *b,
            FormulaValue::Number(n) => *n != 0.0,
            FormulaValue::Text(s) => {
                let s = s.trim();
                !s.is_empty() && !s.eq_ignore_ascii_case("false") && s != "0"
            }
            FormulaValue::List(items) => !items.is_empty(),
        }
    }

    /// 渲染为输出字段文本，Null 返回 None（输出字段被省略）
    pub fn render(&self) -> Option<String> {
        match self {
            FormulaValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            FormulaValue::Null => serde_json::Value::Null,
            FormulaValue::Text(s) => serde_json::Value::String(s.clone()),
            FormulaValue::Bool(b) => serde_json::Value::Bool(*b),
            FormulaValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FormulaValue::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaValue::Null => Ok(()),
            FormulaValue::Text(s) => write!(f, "{}", s),
            FormulaValue::Bool(b) => write!(f, "{}", b),
            FormulaValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FormulaValue::Number(n) => write!(f, "{}", n),
            FormulaValue::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

// ==========================================
// 函数接口
// ==========================================

/// 参数个数范围（max = None 表示不限）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self { min, max: Some(max) }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}..={}", self.min, max),
            None => write!(f, ">={}", self.min),
        }
    }
}

/// 公式函数
///
/// 实现必须可重入，编译后的转换器会在多条记录间复用同一实例。
pub trait FormulaFunction: Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> Arity;

    fn call(&self, args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError>;
}

/// 函数解析能力（编译期绑定）
pub trait FunctionResolver: Send + Sync {
    /// 按名称解析函数，名称大小写不敏感
    fn resolve(&self, name: &str) -> Option<Arc<dyn FormulaFunction>>;
}

// ==========================================
// 内置函数
// ==========================================
type Body = fn(Vec<FormulaValue>) -> Result<FormulaValue, FunctionError>;

struct BuiltinFunction {
    name: &'static str,
    arity: Arity,
    body: Body,
}

impl FormulaFunction for BuiltinFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn call(&self, args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
        (self.body)(args)
    }
}

// ==========================================
// PluginFunction - 外部插件函数适配
// ==========================================
// 插件内部错误统一归类为 FunctionError::Plugin
pub struct PluginFunction<F>
where
    F: Fn(Vec<FormulaValue>) -> anyhow::Result<FormulaValue> + Send + Sync,
{
    name: String,
    arity: Arity,
    body: F,
}

impl<F> PluginFunction<F>
where
    F: Fn(Vec<FormulaValue>) -> anyhow::Result<FormulaValue> + Send + Sync,
{
    pub fn new(name: impl Into<String>, arity: Arity, body: F) -> Self {
        Self {
            name: name.into(),
            arity,
            body,
        }
    }
}

impl<F> FormulaFunction for PluginFunction<F>
where
    F: Fn(Vec<FormulaValue>) -> anyhow::Result<FormulaValue> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn call(&self, args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
        (self.body)(args).map_err(|e| FunctionError::Plugin(format!("插件函数 {} 执行失败: {}", self.name, e)))
    }
}

// ==========================================
// StandardFunctions - 默认函数注册表
// ==========================================
pub struct StandardFunctions {
    functions: HashMap<String, Arc<dyn FormulaFunction>>,
}

impl Default for StandardFunctions {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardFunctions {
    /// 创建包含全部内置函数的注册表
    pub fn new() -> Self {
        let builtins: Vec<BuiltinFunction> = vec![
            BuiltinFunction { name: "concat", arity: Arity::at_least(1), body: concat },
            BuiltinFunction { name: "upper", arity: Arity::exactly(1), body: upper },
            BuiltinFunction { name: "lower", arity: Arity::exactly(1), body: lower },
            BuiltinFunction { name: "trim", arity: Arity::exactly(1), body: trim },
            BuiltinFunction { name: "coalesce", arity: Arity::at_least(1), body: coalesce },
            BuiltinFunction { name: "default", arity: Arity::exactly(2), body: default_value },
            BuiltinFunction { name: "substring", arity: Arity::range(2, 3), body: substring },
            BuiltinFunction { name: "replace", arity: Arity::exactly(3), body: replace },
            BuiltinFunction { name: "split", arity: Arity::exactly(2), body: split },
            BuiltinFunction { name: "join", arity: Arity::exactly(2), body: join },
            BuiltinFunction { name: "equals", arity: Arity::exactly(2), body: equals },
            BuiltinFunction { name: "not", arity: Arity::exactly(1), body: not },
            BuiltinFunction { name: "if", arity: Arity::range(2, 3), body: if_then_else },
            BuiltinFunction { name: "empty", arity: Arity::exactly(1), body: empty },
            BuiltinFunction { name: "number", arity: Arity::exactly(1), body: number },
            BuiltinFunction { name: "date", arity: Arity::exactly(3), body: date },
        ];

        let mut registry = Self {
            functions: HashMap::new(),
        };
        for builtin in builtins {
            registry.register(Arc::new(builtin));
        }
        registry
    }

    /// 注册函数（同名覆盖）
    pub fn register(&mut self, function: Arc<dyn FormulaFunction>) {
        self.functions
            .insert(function.name().to_lowercase(), function);
    }

    pub fn with_plugin(mut self, function: Arc<dyn FormulaFunction>) -> Self {
        self.register(function);
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl FunctionResolver for StandardFunctions {
    fn resolve(&self, name: &str) -> Option<Arc<dyn FormulaFunction>> {
        self.functions.get(&name.to_lowercase()).cloned()
    }
}

// ===== 内置函数实现 =====

fn text_arg(args: &[FormulaValue], index: usize, function: &str) -> Result<Option<String>, FunctionError> {
    match args.get(index) {
        None | Some(FormulaValue::Null) => Ok(None),
        Some(FormulaValue::List(_)) => Err(FunctionError::Execution(format!(
            "{}: 第 {} 个参数不能是列表",
            function,
            index + 1
        ))),
        Some(other) => Ok(Some(other.to_string())),
    }
}

fn number_arg(args: &[FormulaValue], index: usize, function: &str) -> Result<f64, FunctionError> {
    let n = match args.get(index) {
        Some(FormulaValue::Number(n)) => *n,
        Some(FormulaValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
            FunctionError::Execution(format!("{}: 无法解析为数值: {}", function, s))
        })?,
        _ => {
            return Err(FunctionError::Execution(format!(
                "{}: 第 {} 个参数必须是数值",
                function,
                index + 1
            )))
        }
    };
    // NaN / 无穷大不参与计算
    if !n.is_finite() {
        return Err(FunctionError::Execution(format!("{}: 数值超出范围: {}", function, n)));
    }
    Ok(n)
}

fn map_text(args: Vec<FormulaValue>, function: &str, f: impl Fn(&str) -> String) -> Result<FormulaValue, FunctionError> {
    Ok(match text_arg(&args, 0, function)? {
        Some(s) => FormulaValue::Text(f(&s)),
        None => FormulaValue::Null,
    })
}

fn concat(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    if args.iter().all(FormulaValue::is_null) {
        return Ok(FormulaValue::Null);
    }
    let mut out = String::new();
    for index in 0..args.len() {
        if let Some(part) = text_arg(&args, index, "concat")? {
            out.push_str(&part);
        }
    }
    Ok(FormulaValue::Text(out))
}

fn upper(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    map_text(args, "upper", |s| s.to_uppercase())
}

fn lower(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    map_text(args, "lower", |s| s.to_lowercase())
}

fn trim(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    map_text(args, "trim", |s| s.trim().to_string())
}

fn coalesce(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    Ok(args
        .into_iter()
        .find(|v| !v.is_empty())
        .unwrap_or(FormulaValue::Null))
}

fn default_value(mut args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let fallback = args.pop().unwrap_or(FormulaValue::Null);
    let value = args.pop().unwrap_or(FormulaValue::Null);
    Ok(if value.is_null() { fallback } else { value })
}

fn substring(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let Some(s) = text_arg(&args, 0, "substring")? else {
        return Ok(FormulaValue::Null);
    };
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;

    // 负数起点从末尾计算
    let start = number_arg(&args, 1, "substring")? as i64;
    let start = if start < 0 { len.saturating_add(start).max(0) } else { start.min(len) };
    let end = if args.len() > 2 {
        let count = number_arg(&args, 2, "substring")? as i64;
        if count < 0 {
            return Err(FunctionError::Execution(format!("substring: 长度不能为负数: {}", count)));
        }
        start.saturating_add(count).min(len)
    } else {
        len
    };

    Ok(FormulaValue::Text(chars[start as usize..end as usize].iter().collect()))
}

fn replace(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let Some(s) = text_arg(&args, 0, "replace")? else {
        return Ok(FormulaValue::Null);
    };
    let from = text_arg(&args, 1, "replace")?.unwrap_or_default();
    if from.is_empty() {
        return Err(FunctionError::Execution("replace: 被替换文本不能为空".to_string()));
    }
    let to = text_arg(&args, 2, "replace")?.unwrap_or_default();
    Ok(FormulaValue::Text(s.replace(&from, &to)))
}

fn split(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let Some(s) = text_arg(&args, 0, "split")? else {
        return Ok(FormulaValue::Null);
    };
    let separator = text_arg(&args, 1, "split")?.unwrap_or_default();
    if separator.is_empty() {
        return Err(FunctionError::Execution("split: 分隔符不能为空".to_string()));
    }
    Ok(FormulaValue::List(
        s.split(separator.as_str())
            .map(|part| FormulaValue::Text(part.trim().to_string()))
            .filter(|v| !v.is_empty())
            .collect(),
    ))
}

fn join(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let separator = text_arg(&args, 1, "join")?.unwrap_or_default();
    match args.into_iter().next() {
        Some(FormulaValue::List(items)) => Ok(FormulaValue::Text(
            items
                .iter()
                .filter_map(FormulaValue::render)
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        Some(FormulaValue::Null) | None => Ok(FormulaValue::Null),
        Some(other) => Ok(FormulaValue::Text(other.to_string())),
    }
}

fn equals(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let left = args.first().and_then(FormulaValue::render);
    let right = args.get(1).and_then(FormulaValue::render);
    Ok(FormulaValue::Bool(left == right))
}

fn not(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    Ok(FormulaValue::Bool(!args.first().map_or(false, FormulaValue::truthy)))
}

fn if_then_else(mut args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let otherwise = if args.len() > 2 { args.pop() } else { None };
    let then = args.pop().unwrap_or(FormulaValue::Null);
    let condition = args.pop().unwrap_or(FormulaValue::Null);
    Ok(if condition.truthy() {
        then
    } else {
        otherwise.unwrap_or(FormulaValue::Null)
    })
}

fn empty(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    Ok(FormulaValue::Bool(args.first().map_or(true, FormulaValue::is_empty)))
}

fn number(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    match args.first() {
        None | Some(FormulaValue::Null) => Ok(FormulaValue::Null),
        Some(_) => Ok(FormulaValue::Number(number_arg(&args, 0, "number")?)),
    }
}

/// date(value, 源格式, 目标格式)，支持纯日期和日期时间格式
fn date(args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
    let Some(value) = text_arg(&args, 0, "date")? else {
        return Ok(FormulaValue::Null);
    };
    let from = text_arg(&args, 1, "date")?.unwrap_or_default();
    let to = text_arg(&args, 2, "date")?.unwrap_or_default();

    let value = value.trim();
    let mut out = String::new();
    let written = if let Ok(dt) = NaiveDateTime::parse_from_str(value, &from) {
        write!(out, "{}", dt.format(&to))
    } else {
        let d = NaiveDate::parse_from_str(value, &from).map_err(|_| {
            FunctionError::Execution(format!("date: 日期格式错误: {} (期望 {})", value, from))
        })?;
        write!(out, "{}", d.format(&to))
    };
    written.map_err(|_| FunctionError::Execution(format!("date: 无效的目标格式: {}", to)))?;
    Ok(FormulaValue::Text(out))
}
