use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("输入验证失败: {0}")]
    Validation(String),
    #[error("诊断任务未找到: {id}")]
    JobNotFound { id: String },
    #[error("诊断任务已存在: {id}")]
    JobAlreadyExists { id: String },
    #[error("非法的任务状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("未配置的模型提供方: {0}")]
    UnknownProvider(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("报告投递失败: {0}")]
    ReportDelivery(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DiagnosisResult<T> = Result<T, DiagnosisError>;

impl DiagnosisError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DiagnosisError::Validation(_) | DiagnosisError::UnknownProvider(_)
        )
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiagnosisError::Internal(_) | DiagnosisError::Configuration(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            DiagnosisError::Validation(_) => "输入数据验证失败",
            DiagnosisError::UnknownProvider(_) => "选择的模型不可用",
            DiagnosisError::JobNotFound { .. } => "请求的诊断任务不存在",
            DiagnosisError::JobAlreadyExists { .. } => "诊断任务已提交",
            DiagnosisError::InvalidTransition { .. } => "诊断任务状态异常",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for DiagnosisError {
    fn from(err: serde_json::Error) -> Self {
        DiagnosisError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DiagnosisError {
    fn from(err: anyhow::Error) -> Self {
        DiagnosisError::Internal(err.to_string())
    }
}
