//! 报告投递
//!
//! Sinks receive the finished job exactly once. Delivery failures are the
//! caller's to log; they never change the job's terminal status.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use diagnosis_domain::{DiagnosisError, DiagnosisResult, JobSnapshot, ReportSink};
use tracing::info;

/// Writes `<dir>/<job_id>.json`, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct JsonFileReportSink {
    dir: PathBuf,
}

impl JsonFileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl ReportSink for JsonFileReportSink {
    async fn deliver(&self, snapshot: &JobSnapshot) -> DiagnosisResult<()> {
        let job_id = snapshot.job.job_id.as_str();
        let path = self.report_path(job_id);
        let tmp = self.dir.join(format!(".{job_id}.json.tmp"));
        let body = serde_json::to_vec_pretty(snapshot)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            DiagnosisError::ReportDelivery(format!("创建报告目录失败 {}: {e}", self.dir.display()))
        })?;
        tokio::fs::write(&tmp, &body).await.map_err(|e| {
            DiagnosisError::ReportDelivery(format!("写入报告文件失败 {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            DiagnosisError::ReportDelivery(format!("保存报告文件失败 {}: {e}", path.display()))
        })?;

        info!(job_id = job_id, path = %path.display(), bytes = body.len(), "诊断报告已写入");
        Ok(())
    }
}

/// Emits a one-line summary of every finished job.
#[derive(Debug, Default, Clone)]
pub struct LoggingReportSink;

#[async_trait]
impl ReportSink for LoggingReportSink {
    async fn deliver(&self, snapshot: &JobSnapshot) -> DiagnosisResult<()> {
        let report = &snapshot.report;
        let primary = report
            .primary_brand
            .as_deref()
            .and_then(|brand| report.brand_score(brand));
        info!(
            job_id = %snapshot.job.job_id,
            status = %snapshot.job.status,
            succeeded = report.summary.succeeded,
            total = report.summary.total,
            quality = report.quality.score,
            quality_level = %report.quality.level,
            primary_score = primary.map(|s| s.score),
            warnings = report.warnings.len(),
            "诊断任务完成"
        );
        Ok(())
    }
}
