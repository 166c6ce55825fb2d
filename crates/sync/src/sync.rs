//! 동기화 오케스트레이터 -- 링크 이벤트 수신/조정 런 스케줄링 전체 흐름 관리
//!
//! [`NeighSync`]는 core의 [`Service`] trait을 구현하여
//! `proxyneigh-daemon`에서 링크 감시자와 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LinkEvent ──mpsc──> NeighSync
//!                        |
//!                  in-flight 레지스트리 (인터페이스명 키)
//!                        |
//!                  Reconciler.run()  (인터페이스당 태스크 1개)
//! ```
//!
//! 같은 인터페이스에 대한 런은 한 번에 하나만 실행됩니다. 런 실행 중
//! 도착한 트리거는 후속 런 1회로 병합되고, 런이 없는 인터페이스의
//! 트리거는 즉시 새 태스크를 스폰합니다. 서로 다른 인터페이스의 런은
//! 완전히 독립적입니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use proxyneigh_core::error::{ProxyneighError, ServiceError};
use proxyneigh_core::event::LinkEvent;
use proxyneigh_core::service::{HealthStatus, Service};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lxd::MetadataClient;
use crate::neigh::NeighbourTable;
use crate::reconcile::Reconciler;

/// 동기화 모듈 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 프록시 네이버 동기화 모듈
///
/// 링크 이벤트를 수신하여 UP 전이마다 조정 런을 스케줄링합니다.
/// 이벤트 경로는 런 완료를 기다리지 않습니다.
pub struct NeighSync<M: MetadataClient, N: NeighbourTable> {
    config: SyncConfig,
    state: SyncState,
    /// 메타데이터 소스 (공유)
    metadata: Arc<M>,
    /// 커널 네이버 테이블 게이트웨이 (공유)
    table: Arc<N>,
    /// 링크 이벤트 수신 채널
    link_rx: Option<mpsc::Receiver<LinkEvent>>,
    /// 백그라운드 태스크 핸들
    tasks: Vec<JoinHandle<()>>,
    /// 완료된 런 카운터
    runs_completed: Arc<AtomicU64>,
    /// 중단된 런 카운터
    runs_aborted: Arc<AtomicU64>,
    /// 삭제된 엔트리 카운터
    entries_deleted: Arc<AtomicU64>,
    /// 엔트리 추가 실패 카운터
    add_failures: Arc<AtomicU64>,
    /// 엔트리 삭제 실패 카운터
    delete_failures: Arc<AtomicU64>,
}

impl<M: MetadataClient, N: NeighbourTable> NeighSync<M, N> {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            SyncState::Initialized => "initialized",
            SyncState::Running => "running",
            SyncState::Stopped => "stopped",
        }
    }

    /// 완료된 런 수를 반환합니다.
    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    /// 중단된 런 수를 반환합니다.
    pub fn runs_aborted(&self) -> u64 {
        self.runs_aborted.load(Ordering::Relaxed)
    }

    /// 삭제된 엔트리 수를 반환합니다.
    pub fn entries_deleted(&self) -> u64 {
        self.entries_deleted.load(Ordering::Relaxed)
    }

    /// 엔트리 추가 실패 수를 반환합니다.
    pub fn add_failures(&self) -> u64 {
        self.add_failures.load(Ordering::Relaxed)
    }

    /// 엔트리 삭제 실패 수를 반환합니다.
    pub fn delete_failures(&self) -> u64 {
        self.delete_failures.load(Ordering::Relaxed)
    }

    /// 모듈 설정을 반환합니다.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

/// 런 태스크 하나가 공유하는 카운터 묶음
struct RunCounters {
    runs_completed: Arc<AtomicU64>,
    runs_aborted: Arc<AtomicU64>,
    entries_deleted: Arc<AtomicU64>,
    add_failures: Arc<AtomicU64>,
    delete_failures: Arc<AtomicU64>,
}

impl<M: MetadataClient, N: NeighbourTable> Service for NeighSync<M, N> {
    async fn start(&mut self) -> Result<(), ProxyneighError> {
        if self.state == SyncState::Running {
            return Err(ServiceError::AlreadyRunning.into());
        }

        info!("starting proxy neighbour sync");

        // LXD 연결 확인 — 실패해도 기동은 계속 (런은 자연 재시도됨)
        if self.metadata.ping().await.is_err() {
            warn!("lxd not reachable, sync will run in degraded mode until it responds");
        }

        let mut link_rx = self.link_rx.take().ok_or(ProxyneighError::Service(
            ServiceError::InitFailed(
                "link receiver not available (was it consumed by a previous start? rebuild the module to restart)"
                    .to_owned(),
            ),
        ))?;

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.table),
        ));

        let runs_completed = Arc::clone(&self.runs_completed);
        let runs_aborted = Arc::clone(&self.runs_aborted);
        let entries_deleted = Arc::clone(&self.entries_deleted);
        let add_failures = Arc::clone(&self.add_failures);
        let delete_failures = Arc::clone(&self.delete_failures);

        let processing_task = tokio::spawn(async move {
            // 인터페이스명(case-fold) → 후속 런 요청 여부
            let inflight: Arc<Mutex<HashMap<String, bool>>> =
                Arc::new(Mutex::new(HashMap::new()));

            while let Some(event) = link_rx.recv().await {
                if !event.oper_up {
                    trace!(link = %event.link, "ignoring non-up transition");
                    continue;
                }

                info!(
                    link = %event.link,
                    trace_id = %event.metadata.trace_id,
                    "interface up, scheduling proxy neighbour sync"
                );

                let key = event.link.trim().to_ascii_lowercase();
                {
                    let mut guard = inflight.lock().await;
                    if let Some(rerun) = guard.get_mut(&key) {
                        // 실행 중이면 후속 런 1회로 병합
                        *rerun = true;
                        debug!(link = %event.link, "run already in flight, coalescing trigger");
                        continue;
                    }
                    guard.insert(key.clone(), false);
                }

                let reconciler = Arc::clone(&reconciler);
                let inflight = Arc::clone(&inflight);
                let counters = RunCounters {
                    runs_completed: Arc::clone(&runs_completed),
                    runs_aborted: Arc::clone(&runs_aborted),
                    entries_deleted: Arc::clone(&entries_deleted),
                    add_failures: Arc::clone(&add_failures),
                    delete_failures: Arc::clone(&delete_failures),
                };
                let link = event.link.clone();
                let trace_id = event.metadata.trace_id.clone();

                tokio::spawn(async move {
                    let key = link.trim().to_ascii_lowercase();
                    loop {
                        match reconciler.run(&link, &trace_id).await {
                            Ok(report) => {
                                counters.runs_completed.fetch_add(1, Ordering::Relaxed);
                                counters
                                    .entries_deleted
                                    .fetch_add(report.deleted as u64, Ordering::Relaxed);
                                counters
                                    .add_failures
                                    .fetch_add(report.add_failures as u64, Ordering::Relaxed);
                                counters
                                    .delete_failures
                                    .fetch_add(report.delete_failures as u64, Ordering::Relaxed);
                                info!(%trace_id, %report, "proxy neighbour sync completed");
                            }
                            Err(e) => {
                                counters.runs_aborted.fetch_add(1, Ordering::Relaxed);
                                error!(
                                    %trace_id,
                                    link = %link,
                                    error = %e,
                                    "proxy neighbour sync aborted"
                                );
                            }
                        }

                        let mut guard = inflight.lock().await;
                        if guard.get(&key) == Some(&true) {
                            guard.insert(key.clone(), false);
                            debug!(link = %link, "rerunning coalesced trigger");
                        } else {
                            guard.remove(&key);
                            break;
                        }
                    }
                });
            }

            info!("link event channel closed, stopping sync loop");
        });

        self.tasks.push(processing_task);
        self.state = SyncState::Running;
        info!("proxy neighbour sync started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProxyneighError> {
        if self.state != SyncState::Running {
            return Err(ServiceError::NotRunning.into());
        }

        info!("stopping proxy neighbour sync");

        // 이벤트 루프만 중단 — 진행 중인 런은 스스로 완료됨
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = SyncState::Stopped;
        info!("proxy neighbour sync stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            SyncState::Running => {
                if self.metadata.ping().await.is_ok() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded("lxd not reachable".to_owned())
                }
            }
            SyncState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SyncState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 동기화 모듈 빌더
///
/// 모듈을 구성하고 필요한 의존성을 연결합니다.
pub struct NeighSyncBuilder<M: MetadataClient, N: NeighbourTable> {
    config: SyncConfig,
    metadata: Option<Arc<M>>,
    table: Option<Arc<N>>,
    link_rx: Option<mpsc::Receiver<LinkEvent>>,
}

impl<M: MetadataClient, N: NeighbourTable> NeighSyncBuilder<M, N> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            metadata: None,
            table: None,
            link_rx: None,
        }
    }

    /// 모듈 설정을 지정합니다.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// 메타데이터 클라이언트를 설정합니다.
    pub fn metadata_client(mut self, metadata: Arc<M>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 네이버 테이블 게이트웨이를 설정합니다.
    pub fn neighbour_table(mut self, table: Arc<N>) -> Self {
        self.table = Some(table);
        self
    }

    /// 링크 이벤트 수신 채널을 설정합니다.
    ///
    /// `proxyneigh-daemon`에서 링크 감시자의 이벤트 채널을 여기에
    /// 연결합니다.
    pub fn link_receiver(mut self, rx: mpsc::Receiver<LinkEvent>) -> Self {
        self.link_rx = Some(rx);
        self
    }

    /// 모듈을 빌드합니다.
    pub fn build(self) -> Result<NeighSync<M, N>, SyncError> {
        self.config.validate()?;

        let metadata = self.metadata.ok_or_else(|| SyncError::Config {
            field: "metadata_client".to_owned(),
            reason: "metadata client must be provided".to_owned(),
        })?;
        let table = self.table.ok_or_else(|| SyncError::Config {
            field: "neighbour_table".to_owned(),
            reason: "neighbour table must be provided".to_owned(),
        })?;

        Ok(NeighSync {
            config: self.config,
            state: SyncState::Initialized,
            metadata,
            table,
            link_rx: self.link_rx,
            tasks: Vec::new(),
            runs_completed: Arc::new(AtomicU64::new(0)),
            runs_aborted: Arc::new(AtomicU64::new(0)),
            entries_deleted: Arc::new(AtomicU64::new(0)),
            add_failures: Arc::new(AtomicU64::new(0)),
            delete_failures: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl<M: MetadataClient, N: NeighbourTable> Default for NeighSyncBuilder<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lxd::MockMetadataClient;
    use crate::neigh::MockNeighbourTable;
    use proxyneigh_core::types::ContainerInfo;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::time::Duration;

    fn ipvlan_container(parent: &str, v4: &str) -> ContainerInfo {
        let device: HashMap<String, String> = [
            ("type", "nic"),
            ("nictype", "ipvlan"),
            ("parent", parent),
            ("ipv4.address", v4),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();

        ContainerInfo {
            name: "ct".to_owned(),
            status: "Running".to_owned(),
            init_pid: 1000,
            devices: HashMap::from([("eth0".to_owned(), device)]),
        }
    }

    fn builder(
        metadata: MockMetadataClient,
        table: MockNeighbourTable,
    ) -> NeighSyncBuilder<MockMetadataClient, MockNeighbourTable> {
        NeighSyncBuilder::new()
            .metadata_client(Arc::new(metadata))
            .neighbour_table(Arc::new(table))
    }

    #[test]
    fn builder_creates_sync_module() {
        let sync = builder(MockMetadataClient::new(), MockNeighbourTable::new())
            .build()
            .unwrap();
        assert_eq!(sync.state_name(), "initialized");
        assert_eq!(sync.runs_completed(), 0);
        assert_eq!(sync.config().event_channel_capacity, 256);
    }

    #[test]
    fn builder_rejects_missing_metadata_client() {
        let result = NeighSyncBuilder::<MockMetadataClient, MockNeighbourTable>::new()
            .neighbour_table(Arc::new(MockNeighbourTable::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_missing_table() {
        let result = NeighSyncBuilder::<MockMetadataClient, MockNeighbourTable>::new()
            .metadata_client(Arc::new(MockMetadataClient::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = builder(MockMetadataClient::new(), MockNeighbourTable::new())
            .config(SyncConfig {
                event_channel_capacity: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_before_start_is_unhealthy() {
        let sync = builder(MockMetadataClient::new(), MockNeighbourTable::new())
            .build()
            .unwrap();
        assert!(sync.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn start_without_link_receiver_fails() {
        let mut sync = builder(MockMetadataClient::new(), MockNeighbourTable::new())
            .build()
            .unwrap();
        let err = sync.start().await;
        assert!(err.is_err());
        let msg = format!("{err:?}");
        assert!(msg.contains("link receiver not available"));
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let (_link_tx, link_rx) = mpsc::channel(16);
        let mut sync = builder(MockMetadataClient::new(), MockNeighbourTable::new())
            .link_receiver(link_rx)
            .build()
            .unwrap();

        sync.start().await.unwrap();
        assert_eq!(sync.state_name(), "running");
        assert!(sync.health_check().await.is_healthy());

        // 중복 시작은 실패
        assert!(sync.start().await.is_err());

        sync.stop().await.unwrap();
        assert_eq!(sync.state_name(), "stopped");

        // 중복 정지는 실패
        assert!(sync.stop().await.is_err());

        // 정지 후 재시작은 채널이 이미 소비되어 실패
        assert!(sync.start().await.is_err());
    }

    #[tokio::test]
    async fn up_event_triggers_reconciliation() {
        let (link_tx, link_rx) = mpsc::channel(16);
        let table = Arc::new(MockNeighbourTable::new().with_link("vlan10", 7));
        let metadata = Arc::new(
            MockMetadataClient::new()
                .with_containers(vec![ipvlan_container("vlan10", "192.0.2.101")]),
        );

        let mut sync = NeighSyncBuilder::new()
            .metadata_client(metadata)
            .neighbour_table(Arc::clone(&table))
            .link_receiver(link_rx)
            .build()
            .unwrap();
        sync.start().await.unwrap();

        link_tx
            .send(LinkEvent::new("vlan10", 7, true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sync.runs_completed(), 1);
        let entries: Vec<IpAddr> = table.table().iter().map(|e| e.ip).collect();
        assert_eq!(entries, vec!["192.0.2.101".parse::<IpAddr>().unwrap()]);

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn non_up_events_are_ignored() {
        let (link_tx, link_rx) = mpsc::channel(16);
        let table = Arc::new(MockNeighbourTable::new().with_link("vlan10", 7));

        let mut sync = NeighSyncBuilder::new()
            .metadata_client(Arc::new(MockMetadataClient::new()))
            .neighbour_table(Arc::clone(&table))
            .link_receiver(link_rx)
            .build()
            .unwrap();
        sync.start().await.unwrap();

        link_tx
            .send(LinkEvent::new("vlan10", 7, false))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sync.runs_completed(), 0);
        assert!(table.added().is_empty());

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn aborted_runs_are_counted() {
        let (link_tx, link_rx) = mpsc::channel(16);
        // vlan10 미등록 → resolve 실패 → 런 중단
        let table = Arc::new(MockNeighbourTable::new());

        let mut sync = NeighSyncBuilder::new()
            .metadata_client(Arc::new(MockMetadataClient::new()))
            .neighbour_table(Arc::clone(&table))
            .link_receiver(link_rx)
            .build()
            .unwrap();
        sync.start().await.unwrap();

        link_tx
            .send(LinkEvent::new("vlan10", 7, true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sync.runs_completed(), 0);
        assert_eq!(sync.runs_aborted(), 1);

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rapid_triggers_for_same_interface_coalesce() {
        let (link_tx, link_rx) = mpsc::channel(16);
        let table = Arc::new(MockNeighbourTable::new().with_link("vlan10", 7));
        // 스냅샷 조회를 느리게 만들어 런 실행 중에 트리거가 도착하게 함
        let metadata = Arc::new(
            MockMetadataClient::new()
                .with_containers(vec![ipvlan_container("vlan10", "192.0.2.101")])
                .with_latency(Duration::from_millis(300)),
        );

        let mut sync = NeighSyncBuilder::new()
            .metadata_client(metadata)
            .neighbour_table(Arc::clone(&table))
            .link_receiver(link_rx)
            .build()
            .unwrap();
        sync.start().await.unwrap();

        // 플래핑 링크: 런 하나가 도는 동안 트리거 3개 추가 도착
        for _ in 0..4 {
            link_tx
                .send(LinkEvent::new("vlan10", 7, true))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;

        // 첫 런 + 병합된 후속 런 1회 = 총 2회
        assert_eq!(sync.runs_completed(), 2);

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn different_interfaces_run_independently() {
        let (link_tx, link_rx) = mpsc::channel(16);
        let table = Arc::new(
            MockNeighbourTable::new()
                .with_link("vlan10", 7)
                .with_link("vlan20", 8),
        );
        let metadata = Arc::new(MockMetadataClient::new().with_containers(vec![
            ipvlan_container("vlan10", "192.0.2.101"),
            ipvlan_container("vlan20", "192.0.2.201"),
        ]));

        let mut sync = NeighSyncBuilder::new()
            .metadata_client(metadata)
            .neighbour_table(Arc::clone(&table))
            .link_receiver(link_rx)
            .build()
            .unwrap();
        sync.start().await.unwrap();

        link_tx
            .send(LinkEvent::new("vlan10", 7, true))
            .await
            .unwrap();
        link_tx
            .send(LinkEvent::new("vlan20", 8, true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(sync.runs_completed(), 2);
        assert_eq!(table.table().len(), 2);

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn health_degraded_when_lxd_unreachable() {
        let (_link_tx, link_rx) = mpsc::channel(16);
        let mut sync = builder(
            MockMetadataClient::new().with_failing_requests(),
            MockNeighbourTable::new(),
        )
        .link_receiver(link_rx)
        .build()
        .unwrap();

        sync.start().await.unwrap();
        assert!(sync.health_check().await.is_degraded());
        sync.stop().await.unwrap();
    }
}
