// ==========================================
// 内容同步系统 - 内容数据仓储
// ==========================================
// 对齐: content / content_work / content_property 表
// 红线: Repository 不含业务逻辑，只做数据映射
// 红线: 更新/删除一律携带期望版本号（乐观锁），影响行数为 0 即冲突
// ==========================================

mod core;
mod dao;

#[cfg(test)]
mod tests;

pub use core::ContentRepository;
pub use dao::ContentDao;
pub(crate) use dao::format_ts;

// ==========================================
// ContentFilter - 隐式删除候选过滤条件
// ==========================================
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ContentFilter {
    #[default]
    All,
    PropertyEquals { key: String, value: String }, // 属性等值（json_extract）
    Enabled(bool),
}

impl ContentFilter {
    /// 生成附加 WHERE 片段与参数
    ///
    /// # 参数
    /// - next_idx: 下一个可用的占位符序号
    pub(crate) fn to_sql(&self, next_idx: usize) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;
        match self {
            ContentFilter::All => (String::new(), Vec::new()),
            ContentFilter::PropertyEquals { key, value } => (
                format!(" AND json_extract(c.properties_json, ?{}) = ?{}", next_idx, next_idx + 1),
                vec![
                    Value::from(format!("$.\"{}\"", key.replace('"', "\\\""))),
                    Value::from(value.clone()),
                ],
            ),
            ContentFilter::Enabled(enabled) => (
                format!(" AND c.enabled = ?{}", next_idx),
                vec![Value::from(i64::from(*enabled))],
            ),
        }
    }
}
