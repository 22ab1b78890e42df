// ==========================================
// 内容同步系统 - 导入器 Trait
// ==========================================
// 职责: 定义外部记录来源接口（不包含实现）
// ==========================================

use crate::domain::content::RawRecord;
use crate::domain::types::RecordStatus;
use crate::importer::error::ImporterResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::Path;

// ==========================================
// Importer Trait
// ==========================================
// 用途: 同步门面的记录来源
// 实现者: FileImporter（以及调用方自带的来源）
#[async_trait]
pub trait Importer: Send + Sync {
    /// 来源名称（日志用）
    fn name(&self) -> &str;

    /// 拉取原始记录
    ///
    /// # 返回
    /// - 异步记录流；元素为 Err(Interrupted) 时门面中止运行
    fn fetch(&self) -> BoxStream<'_, ImporterResult<RawRecord>>;

    /// 同步结束后的后处理（归档/确认等）
    ///
    /// # 参数
    /// - results: 按记录 ID 汇总的最终状态，可能为空
    async fn post_process(&self, results: &BTreeMap<String, RecordStatus>) -> ImporterResult<()>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 单文件解析为原始记录
// 实现者: CsvParser, ExcelParser
pub trait FileParser: Send + Sync {
    /// 解析文件，首行为表头，完全空白的行被跳过
    fn parse_to_raw_records(&self, file_path: &Path) -> ImporterResult<Vec<RawRecord>>;
}
