//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 컨테이너 정보
///
/// 메타데이터 소스(LXD)에서 조회한 컨테이너 한 개의 스냅샷입니다.
/// `devices`는 디바이스명 → 문자열 key-value 설정 맵이며,
/// LXD 디바이스 스키마(`type`, `nictype`, `parent`, `ipv4.address`, ...)를
/// 그대로 담습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// 컨테이너 이름
    pub name: String,
    /// 상태 문자열 (예: "Running")
    pub status: String,
    /// init 프로세스 PID — 0이면 실행 중이 아님
    pub init_pid: i64,
    /// 디바이스명 → 디바이스 설정
    pub devices: HashMap<String, HashMap<String, String>>,
}

impl ContainerInfo {
    /// 컨테이너가 실행 중인지 여부.
    ///
    /// init PID가 0이 아닌 컨테이너만 실행 중으로 간주합니다.
    pub fn is_running(&self) -> bool {
        self.init_pid != 0
    }
}

impl fmt::Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, pid={}, devices={})",
            self.name,
            self.status,
            self.init_pid,
            self.devices.len(),
        )
    }
}
