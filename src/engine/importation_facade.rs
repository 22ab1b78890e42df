// ==========================================
// 内容同步系统 - 导入门面
// ==========================================
// 职责: 编排一次同步运行
//       拉取 → 转换 → 校验 → 内容映射 → 分块应用 → 隐式删除 → 重建 → 后处理
// 红线: 每块一个事务，提交后才落盘审计结果；块之间检查取消标记
// 红线: 单条记录失败只记录不中断；存储/IO/中断错误中止整次运行
// ==========================================

use crate::config::SyncConfig;
use crate::domain::content::ContentEntity;
use crate::domain::context::SyncContext;
use crate::domain::outcome::{ImportOutcome, ImportationValue};
use crate::domain::types::{FailurePhase, RecordStatus, SuccessKind};
use crate::engine::content_map::ContentMapResult;
use crate::engine::error::{SyncError, SyncResult};
use crate::engine::formula::{FunctionResolver, TransformResult, Transformer};
use crate::engine::importation_service::{ImportationContentMap, ImportationService};
use crate::engine::recorder::OutcomeRecorder;
use crate::importer::Importer;
use crate::repository::content_repo::{ContentDao, ContentFilter, ContentRepository};
use crate::repository::error::RepositoryResult;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// 重复标识的失败原因
pub const DUPLICATE_ID_REASON: &str = "Duplicate id";

// ==========================================
// SyncReport - 运行报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub content_type: String,
    pub fetched: usize,                    // 拉取的原始记录数
    pub transformation_failures: usize,    // 转换失败
    pub validation_failures: usize,        // 值构造失败（不含重复）
    pub duplicate_failures: usize,         // 重复标识的非代表值
    pub registered: usize,                 // 新增 + 更新
    pub deleted_explicit: usize,           // 显式删除
    pub deleted_implicit: usize,           // 隐式删除
    pub implicit_deletion_skipped: bool,   // 超过上限而跳过隐式删除
    pub chunks_flushed: usize,             // 已提交的块数
    pub elapsed_ms: u64,
}

impl SyncReport {
    pub fn failures(&self) -> usize {
        self.transformation_failures + self.validation_failures + self.duplicate_failures
    }
}

// ==========================================
// RunTracker - 审计结果与记录状态（单次运行）
// ==========================================
// 记录状态键: 能解析出标识时为标识，否则为 #<拉取序号>
// 失败状态优先: 同一键一旦失败，后续成功不覆盖
struct RunTracker<'r> {
    recorder: &'r mut dyn OutcomeRecorder,
    statuses: BTreeMap<String, RecordStatus>,
}

impl<'r> RunTracker<'r> {
    fn new(recorder: &'r mut dyn OutcomeRecorder) -> Self {
        Self {
            recorder,
            statuses: BTreeMap::new(),
        }
    }

    fn mark(&mut self, key: String, status: RecordStatus) {
        match self.statuses.get(&key) {
            Some(existing) if existing.is_failure() => {}
            _ => {
                self.statuses.insert(key, status);
            }
        }
    }

    /// 记录一条审计结果；key 为 None 时不进入记录状态（隐式删除、汇总失败）
    fn record(&mut self, key: Option<String>, outcome: ImportOutcome) {
        if let Some(key) = key {
            self.mark(key, outcome.status());
        }
        self.recorder.record(outcome);
    }

    fn flush(&mut self) -> SyncResult<()> {
        self.recorder.flush()?;
        Ok(())
    }
}

// ==========================================
// ImportationFacade - 导入门面（每个内容类型一个实例）
// ==========================================
pub struct ImportationFacade {
    service: ImportationService,
    transformer: Transformer,
    repo: Arc<ContentRepository>,
    filter: ContentFilter, // 隐式删除候选过滤条件
}

impl ImportationFacade {
    /// 创建导入门面
    ///
    /// # 参数
    /// - config: 同步配置（先校验）
    /// - resolver: 公式函数解析能力
    /// - repo: 内容仓储
    ///
    /// # 返回
    /// - Err(Config): 配置不合法
    /// - Err(Formula): 公式编译失败
    pub fn new(
        config: SyncConfig,
        resolver: &dyn FunctionResolver,
        repo: Arc<ContentRepository>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let transformer = Transformer::compile(config.formula_defs(), resolver)?;
        debug!(
            content_type = %config.content_type,
            fields = transformer.output_fields().count(),
            "导入门面已创建"
        );
        Ok(Self {
            service: ImportationService::new(config),
            transformer,
            repo,
            filter: ContentFilter::All,
        })
    }

    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn service(&self) -> &ImportationService {
        &self.service
    }

    fn config(&self) -> &SyncConfig {
        self.service.config()
    }

    /// 执行一次同步运行
    ///
    /// # 参数
    /// - importer: 记录来源
    /// - recorder: 审计结果记录器
    /// - ctx: 同步上下文（操作人/时间/取消标记）
    ///
    /// # 返回
    /// - Ok(SyncReport): 运行报告
    /// - Err: 中断 / 存储错误 / 乐观锁冲突 / IO 错误；已提交的块保持提交
    #[instrument(
        skip(self, importer, recorder, ctx),
        fields(run_id = %ctx.run_id, content_type = %self.service.content_type())
    )]
    pub async fn run(
        &self,
        importer: &dyn Importer,
        recorder: &mut dyn OutcomeRecorder,
        ctx: &SyncContext,
    ) -> SyncResult<SyncReport> {
        let started = Instant::now();
        info!(importer = importer.name(), "同步运行开始");

        match self.execute(importer, recorder, ctx).await {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    fetched = report.fetched,
                    registered = report.registered,
                    deleted_explicit = report.deleted_explicit,
                    deleted_implicit = report.deleted_implicit,
                    failures = report.failures(),
                    chunks = report.chunks_flushed,
                    elapsed_ms = report.elapsed_ms,
                    "同步运行完成"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "同步运行中止");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        importer: &dyn Importer,
        recorder: &mut dyn OutcomeRecorder,
        ctx: &SyncContext,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport {
            run_id: ctx.run_id.clone(),
            content_type: self.service.content_type().to_string(),
            ..SyncReport::default()
        };
        let mut tracker = RunTracker::new(recorder);

        // ===== 1. 清空暂存 =====
        self.repo
            .with_transaction(|dao| self.service.initialize_work(dao))?;

        // ===== 2-4. 拉取、转换、构造导入值 =====
        let map = self.fetch_values(importer, &mut tracker, &mut report, ctx).await?;

        // ===== 5. 重复标识 =====
        self.record_duplicates(&map, &mut tracker, &mut report)?;

        // ===== 6. 分块应用 =====
        self.apply_chunks(&map, &mut tracker, &mut report, ctx).await?;

        // ===== 7. 隐式删除 =====
        if self.config().implicit_deletion_allowed {
            self.delete_lost(&mut tracker, &mut report, ctx).await?;
        }

        // ===== 8. 重建 =====
        let summary = self
            .repo
            .with_transaction(|dao| self.service.rebuild(dao, ctx))?;
        debug!(refreshed = summary.refreshed, properties = summary.properties, "重建完成");

        // ===== 9. 后处理 =====
        importer.post_process(&tracker.statuses).await?;

        // ===== 10. 关闭内容映射 =====
        map.close()?;
        Ok(report)
    }

    fn check_cancelled(&self, ctx: &SyncContext) -> SyncResult<()> {
        if ctx.is_cancelled() {
            warn!(run_id = %ctx.run_id, "检测到取消标记，运行中止");
            return Err(SyncError::Interrupted("运行已取消".to_string()));
        }
        Ok(())
    }

    /// 拉取全部记录，失败记录即时登记，有效导入值写入内容映射
    async fn fetch_values(
        &self,
        importer: &dyn Importer,
        tracker: &mut RunTracker<'_>,
        report: &mut SyncReport,
        ctx: &SyncContext,
    ) -> SyncResult<ImportationContentMap> {
        let spill_dir = &self.config().spill_dir;
        tokio::fs::create_dir_all(spill_dir).await?;
        let mut builder = self.service.content_map_builder(spill_dir)?;

        let mut stream = importer.fetch();
        while let Some(item) = stream.next().await {
            self.check_cancelled(ctx)?;
            let source = item?;
            report.fetched += 1;
            let ordinal = report.fetched;

            match self.transformer.transform(source) {
                TransformResult::Failure { reason, source } => {
                    let content_id = self.service.source_id(&source);
                    let key = content_id.clone().unwrap_or_else(|| format!("#{}", ordinal));
                    warn!(ordinal, content_id = ?content_id, reason = %reason, "记录转换失败");
                    tracker.record(
                        Some(key),
                        ImportOutcome::failure(FailurePhase::Transformation, reason, content_id, Some(source)),
                    );
                    report.transformation_failures += 1;
                }
                TransformResult::Success { fields, source } => {
                    let mut failures = Vec::new();
                    let value = self
                        .service
                        .to_importation_value(fields, source, ctx, |f| failures.push(f));
                    if let Some(value) = value {
                        let key = value.key().to_string();
                        tracker.mark(key.clone(), RecordStatus::Unchanged);
                        builder.insert(key, value)?;
                    }
                    for failure in failures {
                        let key = failure.content_id.clone().unwrap_or_else(|| format!("#{}", ordinal));
                        tracker.record(
                            Some(key),
                            ImportOutcome::failure(
                                FailurePhase::Validation,
                                failure.reason,
                                failure.content_id,
                                Some(failure.source),
                            ),
                        );
                        report.validation_failures += 1;
                    }
                }
            }
        }
        drop(stream);
        tracker.flush()?;

        let map = builder.finish()?;
        info!(
            fetched = report.fetched,
            keys = map.len(),
            transformation_failures = report.transformation_failures,
            validation_failures = report.validation_failures,
            spilled = map.spilled_entries(),
            "拉取完成"
        );
        Ok(map)
    }

    /// 重复标识: 每个非代表值记为校验失败，按块落盘
    fn record_duplicates(
        &self,
        map: &ImportationContentMap,
        tracker: &mut RunTracker<'_>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        if !map.has_duplicates() {
            return Ok(());
        }

        let chunk_size = self.config().chunk_size;
        let mut pending = 0;
        for (key, values) in map.duplicates()? {
            warn!(content_id = %key, count = values.len(), "重复标识");
            for value in values.into_iter().skip(1) {
                tracker.record(
                    Some(key.clone()),
                    ImportOutcome::failure(
                        FailurePhase::Validation,
                        DUPLICATE_ID_REASON,
                        Some(key.clone()),
                        Some(value.source),
                    ),
                );
                report.duplicate_failures += 1;
                pending += 1;
                if pending == chunk_size {
                    tracker.flush()?;
                    pending = 0;
                }
            }
        }
        tracker.flush()
    }

    /// 分块应用: 每块一个事务，提交后落盘审计结果
    async fn apply_chunks(
        &self,
        map: &ImportationContentMap,
        tracker: &mut RunTracker<'_>,
        report: &mut SyncReport,
        ctx: &SyncContext,
    ) -> SyncResult<()> {
        let chunk_size = self.config().chunk_size;
        let mut values = map.stream();

        loop {
            self.check_cancelled(ctx)?;
            let chunk = values
                .by_ref()
                .take(chunk_size)
                .collect::<ContentMapResult<Vec<ImportationValue>>>()?;
            if chunk.is_empty() {
                break;
            }

            let outcomes = self
                .repo
                .with_transaction(|dao| self.apply_chunk(dao, &chunk, ctx))?;

            for outcome in outcomes {
                if let ImportOutcome::Success { kind, .. } = &outcome {
                    match kind {
                        SuccessKind::Register => report.registered += 1,
                        SuccessKind::Deletion => report.deleted_explicit += 1,
                    }
                }
                let key = outcome.content_id().map(str::to_string);
                tracker.record(key, outcome);
            }
            tracker.flush()?;
            report.chunks_flushed += 1;
            debug!(chunk = report.chunks_flushed, size = chunk.len(), "块已提交");

            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// 单块应用（在调用方事务内）
    ///
    /// # 返回
    /// - 本块的成功结果（删除在前，登记在后）
    fn apply_chunk(
        &self,
        dao: &ContentDao<'_>,
        chunk: &[ImportationValue],
        ctx: &SyncContext,
    ) -> RepositoryResult<Vec<ImportOutcome>> {
        let ct = self.service.content_type();
        let (deletions, upserts): (Vec<&ImportationValue>, Vec<&ImportationValue>) =
            chunk.iter().partition(|v| v.deletion_requested);
        let mut outcomes = Vec::new();

        // 显式删除: 只处理库中存活的实体
        if !deletions.is_empty() {
            let ids: Vec<&str> = deletions.iter().map(|v| v.key()).collect();
            let live: HashMap<String, ContentEntity> = dao
                .find_by_ids(ct, &ids)?
                .into_iter()
                .filter(|e| !e.deleted)
                .map(|e| (e.content_id.clone(), e))
                .collect();
            for value in deletions {
                match live.get(value.key()) {
                    Some(entity) => {
                        self.service.delete(dao, entity, ctx)?;
                        outcomes.push(ImportOutcome::success(
                            SuccessKind::Deletion,
                            value.key(),
                            Some(value.source.clone()),
                        ));
                    }
                    None => debug!(content_id = %value.key(), "删除请求的实体不存在，忽略"),
                }
            }
        }

        self.service.register_work(dao, chunk)?;

        let staged: BTreeMap<String, ImportationValue> = upserts
            .into_iter()
            .map(|v| (v.key().to_string(), v.clone()))
            .collect();
        for value in self.service.get_to_be_registered(dao, &staged)? {
            self.service.register(dao, &value, ctx)?;
            outcomes.push(ImportOutcome::success(
                SuccessKind::Register,
                value.key().to_string(),
                Some(value.source),
            ));
        }
        Ok(outcomes)
    }

    /// 隐式删除: 存活、未暂存、满足过滤条件的实体
    async fn delete_lost(
        &self,
        tracker: &mut RunTracker<'_>,
        report: &mut SyncReport,
        ctx: &SyncContext,
    ) -> SyncResult<()> {
        let ct = self.service.content_type();
        let limit = self.config().deletion_limit;
        let chunk_size = self.config().chunk_size;

        let lost = self
            .repo
            .with_transaction(|dao| dao.count_lost(ct, &self.filter))?;
        if lost > limit {
            warn!(lost, limit, "隐式删除数量超过上限，本次跳过");
            tracker.record(
                None,
                ImportOutcome::failure(
                    FailurePhase::Provisioning,
                    format!("Implicit deletion of {} records exceeds the limit of {}", lost, limit),
                    None,
                    None,
                ),
            );
            tracker.flush()?;
            report.implicit_deletion_skipped = true;
            return Ok(());
        }

        loop {
            self.check_cancelled(ctx)?;
            let deleted = self.repo.with_transaction(|dao| -> RepositoryResult<Vec<String>> {
                let batch = dao.lost(ct, &self.filter, chunk_size)?;
                for entity in &batch {
                    self.service.delete(dao, entity, ctx)?;
                }
                Ok(batch.into_iter().map(|e| e.content_id).collect())
            })?;
            if deleted.is_empty() {
                break;
            }

            for content_id in deleted {
                tracker.record(None, ImportOutcome::success(SuccessKind::Deletion, content_id, None));
                report.deleted_implicit += 1;
            }
            tracker.flush()?;
            tokio::task::yield_now().await;
        }

        info!(lost, deleted = report.deleted_implicit, "隐式删除完成");
        Ok(())
    }
}
