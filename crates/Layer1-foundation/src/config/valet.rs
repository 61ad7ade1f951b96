//! Valet Config - 통합 설정
//!
//! 에이전트 프로필과 실행 리소스 한도를 하나의 파일로 관리합니다.

use super::{AgentProfile, JsonStore};
use crate::Result;
use serde::{Deserialize, Serialize};

/// 설정 파일명
pub const VALET_CONFIG_FILE: &str = "config.json";

fn default_version() -> u32 {
    1
}

// ============================================================================
// Task Limits (실행 리소스 한도)
// ============================================================================

/// 외부 명령어 실행 한도
///
/// 러너는 한도를 기본값 없이 명시적으로 받으므로, 설정 파일이 항상
/// 구체적인 값을 제공합니다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLimits {
    /// 실행 제한 시간 (밀리초)
    pub timeout_ms: u64,

    /// 캡처할 stdout/stderr 최대 문자 수 (스트림별)
    pub max_output_chars: usize,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_output_chars: 16_384,
        }
    }
}

// ============================================================================
// Valet Config (통합)
// ============================================================================

/// Valet 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValetConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// 에이전트 프로필 목록
    #[serde(default)]
    pub agents: Vec<AgentProfile>,

    /// 실행 한도
    #[serde(default)]
    pub limits: TaskLimits,
}

impl Default for ValetConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            agents: vec![AgentProfile::standard()],
            limits: TaskLimits::default(),
        }
    }
}

impl ValetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 설정 로드 (파일이 없으면 기본값)
    pub fn load_global() -> Result<Self> {
        let store = JsonStore::global()?;
        Ok(store.load_or_default(VALET_CONFIG_FILE))
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(VALET_CONFIG_FILE, self)
    }

    // ========================================================================
    // 프로필 조회
    // ========================================================================

    /// 이름으로 프로필 조회
    pub fn agent(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_standard_agent() {
        let config = ValetConfig::default();
        assert!(config.agent("valet").is_some());
        assert!(config.agent("nobody").is_none());
    }

    #[test]
    fn test_limits_survive_round_trip() {
        let mut config = ValetConfig::new();
        config.limits.timeout_ms = 5_000;
        config.limits.max_output_chars = 256;

        let json = serde_json::to_string(&config).unwrap();
        let back: ValetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limits.timeout_ms, 5_000);
        assert_eq!(back.limits.max_output_chars, 256);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let back: ValetConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(back.version, 1);
        assert_eq!(back.limits.timeout_ms, 120_000);
    }
}
