// ==========================================
// 内容同步系统 - 公式转换器
// ==========================================
// 职责: 编译一组 输出字段 → 公式，按记录求值为字段映射
// 红线: 单条记录失败只产生 Failure，绝不中断整批
// ==========================================

use crate::domain::content::RawRecord;
use crate::engine::formula::error::{FormulaError, FormulaResult, FunctionError};
use crate::engine::formula::functions::FunctionResolver;
use crate::engine::formula::parser::{parse, Expr};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// 非预期错误的兜底失败原因
pub const GENERIC_TRANSFORM_FAILURE: &str = "unexpected error while evaluating formula";

// ==========================================
// TransformResult - 转换结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    Success {
        fields: BTreeMap<String, String>,
        source: RawRecord,
    },
    Failure {
        reason: String,
        source: RawRecord,
    },
}

impl TransformResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransformResult::Success { .. })
    }

    pub fn source(&self) -> &RawRecord {
        match self {
            TransformResult::Success { source, .. } | TransformResult::Failure { source, .. } => source,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledField {
    name: String,
    expr: Expr,
}

// ==========================================
// Transformer - 编译后的转换器（无状态，可跨记录复用）
// ==========================================
#[derive(Debug, Clone)]
pub struct Transformer {
    fields: Vec<CompiledField>,
}

impl Transformer {
    /// 编译公式定义
    ///
    /// # 参数
    /// - defs: 有序的 (输出字段, 公式文本)，求值按此顺序进行
    /// - resolver: 函数解析能力（大小写不敏感）
    ///
    /// # 返回
    /// - Err: 语法错误 / 未知函数 / 参数个数错误 / 输出字段重复
    pub fn compile<I, K, V>(defs: I, resolver: &dyn FunctionResolver) -> FormulaResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();

        for (name, text) in defs {
            let name = name.as_ref().trim().to_string();
            if !seen.insert(name.clone()) {
                return Err(FormulaError::DuplicateField(name));
            }
            let expr = parse(&name, text.as_ref(), resolver)?;
            fields.push(CompiledField { name, expr });
        }

        debug!(fields = fields.len(), "公式编译完成");
        Ok(Self { fields })
    }

    pub fn output_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// 转换单条记录
    ///
    /// # 说明
    /// - 各输出字段独立求值，求值为 Null 的字段被省略
    /// - Execution / Plugin 错误以其消息作为失败原因，其它错误使用兜底原因
    pub fn transform(&self, record: RawRecord) -> TransformResult {
        let mut output = BTreeMap::new();

        for field in &self.fields {
            match field.expr.evaluate(&record) {
                Ok(value) => {
                    if let Some(text) = value.render() {
                        output.insert(field.name.clone(), text);
                    }
                }
                Err(err) => {
                    let reason = match err {
                        FunctionError::Execution(message) | FunctionError::Plugin(message) => message,
                        FunctionError::Other(other) => {
                            debug!(field = %field.name, error = %other, "公式求值出现非预期错误");
                            GENERIC_TRANSFORM_FAILURE.to_string()
                        }
                    };
                    return TransformResult::Failure {
                        reason,
                        source: record,
                    };
                }
            }
        }

        TransformResult::Success {
            fields: output,
            source: record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::formula::functions::{
        Arity, FormulaFunction, FormulaValue, PluginFunction, StandardFunctions,
    };
    use std::sync::Arc;

    struct Unstable;

    impl FormulaFunction for Unstable {
        fn name(&self) -> &str {
            "unstable"
        }

        fn arity(&self) -> Arity {
            Arity::exactly(0)
        }

        fn call(&self, _args: Vec<FormulaValue>) -> Result<FormulaValue, FunctionError> {
            Err(FunctionError::Other(anyhow::anyhow!("internal state corrupted")))
        }
    }

    fn registry() -> StandardFunctions {
        StandardFunctions::new()
            .with_plugin(Arc::new(Unstable))
            .with_plugin(Arc::new(PluginFunction::new("reject", Arity::exactly(1), |args: Vec<FormulaValue>| {
                Err(anyhow::anyhow!("rejected {}", args[0]))
            })))
    }

    fn alice() -> RawRecord {
        [("id", "u1"), ("name", "Alice")].into_iter().collect()
    }

    #[test]
    fn test_transform_field_reference() {
        let transformer = Transformer::compile([("name", "field(name)")], &registry()).unwrap();
        match transformer.transform(alice()) {
            TransformResult::Success { fields, source } => {
                assert_eq!(fields.get("name").map(String::as_str), Some("Alice"));
                assert_eq!(fields.len(), 1);
                assert_eq!(source, alice());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_null_result_omits_field() {
        let transformer = Transformer::compile(
            [("mail", "field(mail)"), ("name", "upper(name)")],
            &registry(),
        )
        .unwrap();
        let TransformResult::Success { fields, .. } = transformer.transform(alice()) else {
            panic!("expected success");
        };
        assert!(!fields.contains_key("mail"));
        assert_eq!(fields["name"], "ALICE");
    }

    #[test]
    fn test_transform_is_idempotent() {
        let transformer = Transformer::compile(
            [("display", "concat(name, ' <', default(mail, 'n/a'), '>')")],
            &registry(),
        )
        .unwrap();
        assert_eq!(transformer.transform(alice()), transformer.transform(alice()));
    }

    #[test]
    fn test_expected_errors_surface_their_message() {
        let transformer = Transformer::compile([("n", "number(name)")], &registry()).unwrap();
        match transformer.transform(alice()) {
            TransformResult::Failure { reason, source } => {
                assert!(reason.contains("Alice"), "reason: {}", reason);
                assert_eq!(source, alice());
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let transformer = Transformer::compile([("n", "reject(name)")], &registry()).unwrap();
        let TransformResult::Failure { reason, .. } = transformer.transform(alice()) else {
            panic!("expected failure");
        };
        assert!(reason.contains("rejected Alice"));
    }

    #[test]
    fn test_out_of_range_arguments_fail_the_record() {
        let cases = [
            ("substring(name, 1, number(len))", "1e19", "lice"),
            ("substring(name, number(len))", "-1e19", "Alice"),
        ];
        for (formula, len, expected) in cases {
            let transformer = Transformer::compile([("n", formula)], &registry()).unwrap();
            let record: RawRecord = [("name", "Alice"), ("len", len)].into_iter().collect();
            let TransformResult::Success { fields, .. } = transformer.transform(record) else {
                panic!("expected success for {}", formula);
            };
            assert_eq!(fields["n"], expected);
        }

        let cases = [
            ("substring(name, 1, number(len))", "NaN", "数值超出范围"),
            ("substring(name, 0, len)", "inf", "数值超出范围"),
            ("date(len, '%Y%m%d', '%Q')", "20250101", "无效的目标格式"),
            ("date(len, '%Y%m%d %H%M', '%Y-%m-%d %Q')", "20250101 0930", "无效的目标格式"),
        ];
        for (formula, len, message) in cases {
            let transformer = Transformer::compile([("n", formula)], &registry()).unwrap();
            let record: RawRecord = [("name", "Alice"), ("len", len)].into_iter().collect();
            match transformer.transform(record.clone()) {
                TransformResult::Failure { reason, source } => {
                    assert!(reason.contains(message), "{}: {}", formula, reason);
                    assert_eq!(source, record);
                }
                other => panic!("unexpected result for {}: {:?}", formula, other),
            }
        }
    }

    #[test]
    fn test_unexpected_errors_use_fallback_reason() {
        let transformer = Transformer::compile([("n", "Unstable()")], &registry()).unwrap();
        let TransformResult::Failure { reason, .. } = transformer.transform(alice()) else {
            panic!("expected failure");
        };
        assert_eq!(reason, GENERIC_TRANSFORM_FAILURE);
    }

    #[test]
    fn test_compile_rejects_duplicate_fields() {
        let err = Transformer::compile([("a", "name"), ("a", "id")], &registry()).unwrap_err();
        assert!(matches!(err, FormulaError::DuplicateField(ref f) if f == "a"));
    }

    #[test]
    fn test_output_fields_keep_definition_order() {
        let transformer =
            Transformer::compile([("z", "name"), ("a", "id")], &registry()).unwrap();
        assert_eq!(transformer.output_fields().collect::<Vec<_>>(), vec!["z", "a"]);
    }
}
