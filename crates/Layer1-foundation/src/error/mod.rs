//! Error types for Valet
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Valet 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 큐 관련
    // ========================================================================
    #[error("Invalid chat key: {0}")]
    InvalidChatKey(String),

    // ========================================================================
    // 명령어 검증 관련
    // ========================================================================
    #[error("Missing command: input is empty")]
    MissingCommand,

    #[error("Multiline commands are not supported")]
    MultilineCommand,

    #[error("Invalid command name: {0}")]
    InvalidCommandName(String),

    #[error("Command '{command}' is not allowed for agent '{agent}' (allowed: {allowed})")]
    CommandNotAllowed {
        agent: String,
        command: String,
        allowed: String,
    },

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Task error: {0}")]
    Task(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 호출자 입력 검증 에러인지 확인 (리소스 할당 전에 발생)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidChatKey(_)
                | Error::MissingCommand
                | Error::MultilineCommand
                | Error::InvalidCommandName(_)
                | Error::CommandNotAllowed { .. }
        )
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        self.is_validation() || matches!(self, Error::NotFound(_) | Error::AgentNotFound(_))
    }

    /// CommandNotAllowed 생성 헬퍼
    pub fn command_not_allowed(
        agent: impl Into<String>,
        command: impl Into<String>,
        allowed: &[String],
    ) -> Self {
        Error::CommandNotAllowed {
            agent: agent.into(),
            command: command.into(),
            allowed: allowed.join(", "),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(Error::MissingCommand.is_validation());
        assert!(Error::InvalidChatKey("NaN".into()).is_validation());
        assert!(!Error::Task("boom".into()).is_validation());
    }

    #[test]
    fn test_command_not_allowed_message() {
        let err = Error::command_not_allowed(
            "butler",
            "rm",
            &["echo".to_string(), "ls".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("butler"));
        assert!(msg.contains("'rm'"));
        assert!(msg.contains("echo, ls"));
    }
}
