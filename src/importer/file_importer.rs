// ==========================================
// 内容同步系统 - 目录文件导入器
// ==========================================
// 职责: 读取目录下全部 .csv/.xlsx/.xls 文件作为记录来源
// 后处理: 已消费的文件移入归档目录（未配置归档目录时删除）
// ==========================================

use crate::domain::content::RawRecord;
use crate::domain::types::RecordStatus;
use crate::importer::error::{ImporterError, ImporterResult};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::importer_trait::Importer;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub struct FileImporter {
    name: String,
    source_dir: PathBuf,
    archive_dir: Option<PathBuf>, // None → 后处理时删除
    consumed: Mutex<Vec<PathBuf>>, // 本次 fetch 成功解析的文件
}

impl FileImporter {
    /// 创建目录导入器
    ///
    /// # 参数
    /// - source_dir: 待导入文件目录
    /// - archive_dir: 归档目录；None 表示后处理时直接删除源文件
    pub fn new(source_dir: impl Into<PathBuf>, archive_dir: Option<PathBuf>) -> Self {
        let source_dir = source_dir.into();
        Self {
            name: format!("file:{}", source_dir.display()),
            source_dir,
            archive_dir,
            consumed: Mutex::new(Vec::new()),
        }
    }

    /// 列出待导入文件（按文件名排序，保证记录顺序稳定）
    pub fn list_files(&self) -> ImporterResult<Vec<PathBuf>> {
        if !self.source_dir.is_dir() {
            return Err(ImporterError::FileNotFound(self.source_dir.display().to_string()));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.source_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && UniversalFileParser::supports(path))
            .collect();
        files.sort();
        Ok(files)
    }

    fn consumed_files(&self) -> ImporterResult<Vec<PathBuf>> {
        let mut consumed = self
            .consumed
            .lock()
            .map_err(|e| ImporterError::Other(anyhow::anyhow!("consumed 列表锁获取失败: {}", e)))?;
        Ok(std::mem::take(&mut *consumed))
    }

    fn mark_consumed(&self, path: PathBuf) {
        if let Ok(mut consumed) = self.consumed.lock() {
            consumed.push(path);
        }
    }

    async fn parse_file(&self, path: PathBuf) -> ImporterResult<Vec<RawRecord>> {
        let target = path.clone();
        let records = tokio::task::spawn_blocking(move || UniversalFileParser.parse(&target))
            .await
            .map_err(|e| ImporterError::Other(e.into()))??;

        debug!(file = %path.display(), records = records.len(), "文件解析完成");
        self.mark_consumed(path);
        Ok(records)
    }

    async fn archive(&self, path: &Path, stamp: &str) -> ImporterResult<()> {
        let post_error = |e: std::io::Error| ImporterError::PostProcessError {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        match &self.archive_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await.map_err(post_error)?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let target = dir.join(format!("{}_{}", stamp, file_name));
                tokio::fs::rename(path, &target).await.map_err(post_error)?;
                debug!(from = %path.display(), to = %target.display(), "文件已归档");
            }
            None => {
                tokio::fs::remove_file(path).await.map_err(post_error)?;
                debug!(file = %path.display(), "文件已删除");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Importer for FileImporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxStream<'_, ImporterResult<RawRecord>> {
        let files = match self.list_files() {
            Ok(files) => files,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        info!(source = %self.name, files = files.len(), "开始读取导入文件");

        stream::iter(files)
            .then(move |path| self.parse_file(path))
            .flat_map(|parsed| match parsed {
                Ok(records) => stream::iter(records.into_iter().map(Ok)).boxed(),
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .boxed()
    }

    async fn post_process(&self, results: &BTreeMap<String, RecordStatus>) -> ImporterResult<()> {
        let failed = results.values().filter(|s| s.is_failure()).count();
        if failed > 0 {
            warn!(source = %self.name, failed, total = results.len(), "部分记录同步失败");
        }

        let files = self.consumed_files()?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        for path in &files {
            self.archive(path, &stamp).await?;
        }

        info!(source = %self.name, files = files.len(), "导入文件后处理完成");
        Ok(())
    }
}
