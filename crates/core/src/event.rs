//! 이벤트 시스템 — 모듈 간 통신의 기본 단위
//!
//! 링크 감시자와 동기화 모듈 간 통신은 이벤트 기반 메시지 패싱으로
//! 수행됩니다. [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는
//! 메타데이터이며, trace_id로 이벤트와 그로 인해 수행된 조정(reconcile)
//! 로그를 연결할 수 있습니다.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// --- 모듈명 상수 ---

/// 링크 상태 감시 모듈명
pub const MODULE_LINK_WATCH: &str = "link-watch";
/// 프록시 네이버 동기화 모듈명
pub const MODULE_NEIGH_SYNC: &str = "neigh-sync";

/// 이벤트 메타데이터 — 모든 이벤트에 공통으로 포함되는 추적 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명 (예: "link-watch")
    pub source_module: String,
    /// 추적 ID — 같은 흐름의 이벤트와 로그를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    ///
    /// 새로운 이벤트 체인의 시작점에서 사용합니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// 링크 상태 전이 이벤트
///
/// 커널이 보고한 네트워크 인터페이스의 operational 상태 전이를
/// 나타냅니다. 동기화 모듈은 `oper_up == true`인 이벤트에만 반응합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvent {
    /// 인터페이스 이름
    pub link: String,
    /// 인터페이스 인덱스
    pub ifindex: u32,
    /// operational 상태가 UP으로 전이했는지 여부
    pub oper_up: bool,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
}

impl LinkEvent {
    /// 새 trace_id로 링크 이벤트를 생성합니다.
    pub fn new(link: impl Into<String>, ifindex: u32, oper_up: bool) -> Self {
        Self {
            link: link.into(),
            ifindex,
            oper_up,
            metadata: EventMetadata::with_new_trace(MODULE_LINK_WATCH),
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "link={} ifindex={} oper_up={}",
            self.link, self.ifindex, self.oper_up,
        )
    }
}

fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs().to_string(),
        Err(_) => "invalid".to_owned(),
    }
}
