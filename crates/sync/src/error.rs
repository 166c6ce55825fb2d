//! 동기화 모듈 에러 타입
//!
//! [`SyncError`]는 동기화 모듈 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<SyncError> for ProxyneighError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::net::IpAddr;

use proxyneigh_core::error::{
    ConfigError, MetadataError, NeighbourError, ProxyneighError, ServiceError,
};

/// 동기화 모듈 도메인 에러
///
/// LXD API 호출, netlink 통신, 조정 실행, 설정 에러 등
/// 동기화 모듈 내부의 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// LXD 소켓 연결 실패
    #[error("lxd connection error: {0}")]
    LxdConnection(String),

    /// LXD API가 에러 응답을 반환함
    #[error("lxd api error (status {code}): {message}")]
    LxdApi {
        /// LXD가 보고한 상태 코드
        code: u32,
        /// 에러 메시지
        message: String,
    },

    /// 필요한 LXD API 확장이 없음
    #[error("lxd api extension missing: {0}")]
    MissingExtension(String),

    /// 응답 디코딩 실패
    #[error("decode error: {0}")]
    Decode(String),

    /// 네트워크 인터페이스를 찾을 수 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// netlink 통신 에러
    #[error("netlink error: {0}")]
    Netlink(String),

    /// 프록시 엔트리 추가 실패
    #[error("failed to add proxy entry {ip}: {reason}")]
    AddEntry {
        /// 대상 주소
        ip: IpAddr,
        /// 실패 사유
        reason: String,
    },

    /// 프록시 엔트리 삭제 실패
    #[error("failed to delete proxy entry {ip}: {reason}")]
    DeleteEntry {
        /// 대상 주소
        ip: IpAddr,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<SyncError> for ProxyneighError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::LxdConnection(msg) => {
                ProxyneighError::Metadata(MetadataError::Connection(msg))
            }
            SyncError::LxdApi { code, message } => {
                ProxyneighError::Metadata(MetadataError::Api { code, message })
            }
            SyncError::MissingExtension(name) => {
                ProxyneighError::Metadata(MetadataError::MissingExtension(name))
            }
            SyncError::Decode(msg) => ProxyneighError::Metadata(MetadataError::Decode(msg)),
            SyncError::InterfaceNotFound(link) => {
                ProxyneighError::Neighbour(NeighbourError::InterfaceNotFound(link))
            }
            SyncError::Netlink(msg) => ProxyneighError::Neighbour(NeighbourError::Netlink(msg)),
            SyncError::AddEntry { ip, reason } => {
                ProxyneighError::Neighbour(NeighbourError::AddFailed { ip, reason })
            }
            SyncError::DeleteEntry { ip, reason } => {
                ProxyneighError::Neighbour(NeighbourError::DeleteFailed { ip, reason })
            }
            SyncError::Config { field, reason } => {
                ProxyneighError::Config(ConfigError::InvalidValue { field, reason })
            }
            SyncError::Channel(msg) => ProxyneighError::Service(ServiceError::ChannelSend(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lxd_connection_error_display() {
        let err = SyncError::LxdConnection("socket not found".to_owned());
        assert!(err.to_string().contains("socket not found"));
    }

    #[test]
    fn lxd_api_error_display() {
        let err = SyncError::LxdApi {
            code: 404,
            message: "not found".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn add_entry_error_display() {
        let err = SyncError::AddEntry {
            ip: "2001:db8::101".parse().unwrap(),
            reason: "operation not permitted".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2001:db8::101"));
        assert!(msg.contains("operation not permitted"));
    }

    #[test]
    fn converts_to_core_error_metadata() {
        let err = SyncError::MissingExtension("container_full".to_owned());
        let core_err: ProxyneighError = err.into();
        assert!(matches!(
            core_err,
            ProxyneighError::Metadata(MetadataError::MissingExtension(_))
        ));
    }

    #[test]
    fn converts_to_core_error_interface_not_found() {
        let err = SyncError::InterfaceNotFound("vlan10".to_owned());
        let core_err: ProxyneighError = err.into();
        assert!(matches!(
            core_err,
            ProxyneighError::Neighbour(NeighbourError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn converts_to_core_error_add_failed() {
        let err = SyncError::AddEntry {
            ip: "192.0.2.101".parse().unwrap(),
            reason: "test".to_owned(),
        };
        let core_err: ProxyneighError = err.into();
        assert!(matches!(
            core_err,
            ProxyneighError::Neighbour(NeighbourError::AddFailed { .. })
        ));
    }

    #[test]
    fn converts_to_core_error_config() {
        let err = SyncError::Config {
            field: "event_channel_capacity".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        let core_err: ProxyneighError = err.into();
        assert!(matches!(core_err, ProxyneighError::Config(_)));
    }

    #[test]
    fn converts_to_core_error_channel() {
        let err = SyncError::Channel("receiver dropped".to_owned());
        let core_err: ProxyneighError = err.into();
        assert!(matches!(
            core_err,
            ProxyneighError::Service(ServiceError::ChannelSend(_))
        ));
    }
}
