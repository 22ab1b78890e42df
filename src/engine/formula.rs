// ==========================================
// 内容同步系统 - 公式转换
// ==========================================
// 职责: 逐字段公式 → 表达式树（编译一次）→ 按记录求值
// ==========================================

pub mod error;
pub mod functions;
mod lexer;
mod parser;
pub mod transformer;

pub use error::{FormulaError, FormulaResult, FunctionError};
pub use functions::{
    Arity, FormulaFunction, FormulaValue, FunctionResolver, PluginFunction, StandardFunctions,
};
pub use transformer::{TransformResult, Transformer, GENERIC_TRANSFORM_FAILURE};
