//! 동기화 모듈 설정
//!
//! [`SyncConfig`]는 core의 [`LxdConfig`](proxyneigh_core::config::LxdConfig)를
//! 기반으로 동기화 모듈 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use proxyneigh_core::config::ProxyneighConfig;
//! use proxyneigh_sync::config::SyncConfig;
//!
//! let core_config = ProxyneighConfig::default();
//! let config = SyncConfig::from_core(&core_config.lxd);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// 동기화 모듈 설정
///
/// core의 `LxdConfig`에서 파생되며, 모듈 내부에서 사용하는
/// 추가 설정을 포함합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// LXD 유닉스 소켓 경로
    pub lxd_socket: String,
    /// LXD 요청 타임아웃 (초)
    pub lxd_timeout_secs: u64,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 링크 이벤트 채널 용량
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lxd_socket: "/var/lib/lxd/unix.socket".to_owned(),
            lxd_timeout_secs: 15,
            event_channel_capacity: 256,
        }
    }
}

/// 설정 상한값 상수
const MAX_LXD_TIMEOUT_SECS: u64 = 300;
const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;

impl SyncConfig {
    /// core의 `LxdConfig`에서 모듈 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &proxyneigh_core::config::LxdConfig) -> Self {
        Self {
            lxd_socket: core.socket_path.clone(),
            lxd_timeout_secs: core.timeout_secs,
            ..Self::default()
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.lxd_socket.is_empty() {
            return Err(SyncError::Config {
                field: "lxd_socket".to_owned(),
                reason: "lxd_socket must not be empty".to_owned(),
            });
        }

        if self.lxd_timeout_secs == 0 || self.lxd_timeout_secs > MAX_LXD_TIMEOUT_SECS {
            return Err(SyncError::Config {
                field: "lxd_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_LXD_TIMEOUT_SECS}"),
            });
        }

        if self.event_channel_capacity == 0
            || self.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(SyncError::Config {
                field: "event_channel_capacity".to_owned(),
                reason: format!("must be 1-{MAX_EVENT_CHANNEL_CAPACITY}"),
            });
        }

        Ok(())
    }
}

/// 동기화 모듈 설정 빌더
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// LXD 소켓 경로를 설정합니다.
    pub fn lxd_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.lxd_socket = socket.into();
        self
    }

    /// LXD 요청 타임아웃(초)을 설정합니다.
    pub fn lxd_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lxd_timeout_secs = secs;
        self
    }

    /// 링크 이벤트 채널 용량을 설정합니다.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// 설정을 검증하고 `SyncConfig`를 생성합니다.
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
