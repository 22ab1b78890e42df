// ==========================================
// 内容同步系统 - 公式模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 公式编译错误（编译期，整批不可用）
#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("公式语法错误 (字段 {field}, 位置 {position}): {message}")]
    Syntax {
        field: String,
        position: usize,
        message: String,
    },

    #[error("未知函数 (字段 {field}): {name}")]
    UnknownFunction { field: String, name: String },

    #[error("函数参数个数错误 (字段 {field}, 函数 {name}): 期望 {expected}, 实际 {actual}")]
    Arity {
        field: String,
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("重复的输出字段: {0}")]
    DuplicateField(String),
}

/// 函数求值错误（单条记录，记录为转换失败）
///
/// 只有 Execution / Plugin 两类属于"预期错误"，其消息直接作为失败原因；
/// 其余错误使用统一兜底原因。
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    Plugin(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type FormulaResult<T> = Result<T, FormulaError>;
