//! Run Trace - 실행 추적 기록
//!
//! 하나의 논리 작업(명령어 실행 시도)을 관측하기 위한 상관관계/타이밍
//! 기록입니다. 리소스를 소유하지 않는 순수 값 타입으로, 성공/실패와
//! 무관하게 시작-종료를 감싸는 용도로만 사용합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Trace ID
// ============================================================================

/// 실행 추적 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Trace Status
// ============================================================================

/// 추적 대상 작업의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// 성공
    Success,
    /// 실패
    Failure,
    /// 거부됨 (허용 목록 등)
    Denied,
    /// 시간 초과
    Timeout,
    /// 취소됨
    Cancelled,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

// ============================================================================
// Run Trace
// ============================================================================

/// 진행 중인 실행 추적
///
/// 생성 후 불변입니다. `finish`로 완료 기록을 만듭니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    /// 고유 ID
    pub id: TraceId,

    /// 대화 키
    pub chat: i64,

    /// 요청한 사용자 (알 수 없으면 None)
    pub user: Option<i64>,

    /// 수행 중인 액션 이름
    pub action: String,

    /// 요청 출처 (dispatcher, cli 등)
    pub source: String,

    /// 시작 시간
    pub started_at: DateTime<Utc>,
}

impl RunTrace {
    /// 새 추적 시작
    pub fn start(chat: i64, action: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: TraceId::new(),
            chat,
            user: None,
            action: action.into(),
            source: source.into(),
            started_at: Utc::now(),
        }
    }

    /// 사용자 설정
    pub fn with_user(mut self, user: i64) -> Self {
        self.user = Some(user);
        self
    }

    /// 완료 기록 생성
    ///
    /// `duration_ms`는 현재 시각 기준으로 계산하며 0 미만으로 내려가지
    /// 않습니다 (시계 역행 보호).
    pub fn finish(self, status: TraceStatus) -> RunRecord {
        self.finish_inner(status, None)
    }

    /// 에러와 함께 완료 기록 생성
    pub fn finish_with_error(self, status: TraceStatus, error: impl Into<String>) -> RunRecord {
        self.finish_inner(status, Some(error.into()))
    }

    fn finish_inner(self, status: TraceStatus, error: Option<String>) -> RunRecord {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        RunRecord {
            id: self.id,
            chat: self.chat,
            user: self.user,
            action: self.action,
            source: self.source,
            started_at: self.started_at,
            finished_at,
            status,
            duration_ms,
            error,
        }
    }
}

// ============================================================================
// Run Record
// ============================================================================

/// 완료된 실행 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// 고유 ID (추적에서 승계)
    pub id: TraceId,

    /// 대화 키
    pub chat: i64,

    /// 요청한 사용자
    pub user: Option<i64>,

    /// 수행한 액션 이름
    pub action: String,

    /// 요청 출처
    pub source: String,

    /// 시작 시간
    pub started_at: DateTime<Utc>,

    /// 종료 시간
    pub finished_at: DateTime<Utc>,

    /// 결과 상태
    pub status: TraceStatus,

    /// 소요 시간 (밀리초, 0 이상)
    pub duration_ms: u64,

    /// 에러 메시지 (있을 때만)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
