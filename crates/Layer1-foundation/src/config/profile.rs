//! Agent Profile - 에이전트별 명령어 허용 목록
//!
//! 어떤 에이전트가 어떤 외부 명령어를 실행할 수 있는지, 그리고 어느
//! 디렉토리에서 실행하는지를 정의합니다. 허용 목록에 없는 명령어는
//! 러너가 프로세스를 생성하기 전에 거부합니다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 에이전트 실행 프로필
///
/// 명령어 허용 목록은 명령어 *이름* 단위입니다. 인자는 쉘 해석 없이
/// 그대로 전달되므로 이름 검사만으로 충분합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    /// 에이전트 이름
    pub name: String,

    /// 작업 디렉토리 (프로세스 현재 디렉토리 기준 상대 경로 허용)
    pub cwd: PathBuf,

    /// 허용된 명령어 이름 목록
    #[serde(default)]
    pub allow_commands: Vec<String>,
}

impl AgentProfile {
    /// 새 프로필 생성 (허용 명령어 없음)
    pub fn new(name: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            cwd: cwd.into(),
            allow_commands: Vec::new(),
        }
    }

    /// 허용 명령어 목록 설정
    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// 허용 명령어 하나 추가
    pub fn allow(mut self, command: impl Into<String>) -> Self {
        self.allow_commands.push(command.into());
        self
    }

    /// 명령어 실행 가능 여부 확인 (대소문자 무시)
    pub fn allows(&self, command: &str) -> bool {
        self.allow_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(command))
    }

    /// 첫 실행용 기본 프로필
    ///
    /// 읽기 전용에 가까운 안전한 명령어만 허용합니다.
    pub fn standard() -> Self {
        Self::new("valet", ".").with_commands([
            // 탐색/읽기
            "ls", "pwd", "cat", "head", "tail", "wc",
            // 유틸리티
            "echo", "date", "whoami", "hostname", "uptime", "env", "which",
        ])
    }
}
