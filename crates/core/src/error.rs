//! 에러 타입 — 도메인별 에러 정의

use std::net::IpAddr;

/// proxyneigh 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ProxyneighError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 컨테이너 메타데이터 소스 에러
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// 커널 네이버 테이블 에러
    #[error("neighbour error: {0}")]
    Neighbour(#[from] NeighbourError),

    /// 서비스 생명주기 에러
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 컨테이너 메타데이터 소스 에러
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// 소켓 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// API가 에러 응답을 반환함
    #[error("api error (status {code}): {message}")]
    Api { code: u32, message: String },

    /// 필요한 API 확장이 없음
    #[error("required api extension missing: {0}")]
    MissingExtension(String),

    /// 응답 디코딩 실패
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// 커널 네이버 테이블 에러
#[derive(Debug, thiserror::Error)]
pub enum NeighbourError {
    /// 네트워크 인터페이스를 찾을 수 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// netlink 통신 에러
    #[error("netlink error: {0}")]
    Netlink(String),

    /// 프록시 엔트리 추가 실패
    #[error("failed to add proxy entry {ip}: {reason}")]
    AddFailed { ip: IpAddr, reason: String },

    /// 프록시 엔트리 삭제 실패
    #[error("failed to delete proxy entry {ip}: {reason}")]
    DeleteFailed { ip: IpAddr, reason: String },
}

/// 서비스 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// 이미 실행 중
    #[error("service already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("service not running")]
    NotRunning,

    /// 초기화 실패
    #[error("service init failed: {0}")]
    InitFailed(String),

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),
}
