// ==========================================
// 内容同步系统 - 内容摘要生成器
// ==========================================
// 职责: 对内容的关键字段生成稳定摘要，用于变更检测
// 算法: 规范化 JSON 数组 → UTF-8 → SHA-256 → 小写十六进制
// 红线: 不依赖 HashMap 迭代顺序，属性一律按键升序输出
// ==========================================

use crate::domain::content::Validity;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 参与摘要的元素
///
/// 元素种类是封闭的，调用方无法传入不支持的类型，
/// 因此摘要生成本身不会失败。
#[derive(Debug, Clone, Copy)]
pub enum DigestSource<'a> {
    Null,
    Text(&'a str),
    Bool(bool),
    Validity(&'a Validity),
    Attributes(&'a BTreeMap<String, String>),
}

impl DigestSource<'_> {
    fn to_canonical(self) -> Value {
        match self {
            DigestSource::Null => Value::Null,
            DigestSource::Text(text) => Value::String(text.to_string()),
            DigestSource::Bool(flag) => Value::Bool(flag),
            // 固定顺序: from, to, ignored
            DigestSource::Validity(validity) => Value::Array(vec![
                validity
                    .from
                    .map(|d| Value::String(d.to_rfc3339()))
                    .unwrap_or(Value::Null),
                validity
                    .to
                    .map(|d| Value::String(d.to_rfc3339()))
                    .unwrap_or(Value::Null),
                Value::Bool(validity.ignored),
            ]),
            // [[key, value], ...]，BTreeMap 保证键升序
            DigestSource::Attributes(attributes) => Value::Array(
                attributes
                    .iter()
                    .map(|(k, v)| {
                        Value::Array(vec![Value::String(k.clone()), Value::String(v.clone())])
                    })
                    .collect(),
            ),
        }
    }
}

// ==========================================
// DigestGenerator - 摘要生成器（无状态）
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestGenerator;

impl DigestGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 生成摘要
    ///
    /// # 参数
    /// - sources: 有序元素列表（顺序本身参与摘要）
    ///
    /// # 返回
    /// - 64 位小写十六进制 SHA-256
    pub fn generate(&self, sources: &[DigestSource<'_>]) -> String {
        let canonical = Value::Array(sources.iter().map(|s| s.to_canonical()).collect());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
