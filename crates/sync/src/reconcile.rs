//! Proxy neighbour table reconciliation.
//!
//! One [`Reconciler::run`] recomputes the full desired address set for one
//! interface from the current container snapshot and makes the kernel's
//! managed proxy entries match it: add everything desired, then prune
//! managed entries that are no longer desired. The run is stateless and
//! self-healing — externally removed addresses or half-applied state from
//! a crashed run are corrected on the next trigger.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::extract::DesiredAddresses;
use crate::lxd::MetadataClient;
use crate::neigh::NeighbourTable;

/// Outcome of one reconciliation run.
///
/// Per-entry failures are reported here rather than escalated; the run as
/// a whole only fails when the snapshot, interface resolution, or table
/// listing fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Interface the run reconciled.
    pub link: String,
    /// Resolved interface index.
    pub ifindex: u32,
    /// Size of the desired address set.
    pub desired: usize,
    /// Stale entries deleted.
    pub deleted: usize,
    /// Individual add calls that failed.
    pub add_failures: usize,
    /// Individual delete calls that failed.
    pub delete_failures: usize,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "link={} ifindex={} desired={} deleted={} add_failures={} delete_failures={}",
            self.link, self.ifindex, self.desired, self.deleted, self.add_failures,
            self.delete_failures,
        )
    }
}

/// Reconciles the kernel proxy neighbour table for one interface at a time.
pub struct Reconciler<M: MetadataClient, N: NeighbourTable> {
    metadata: Arc<M>,
    table: Arc<N>,
}

impl<M: MetadataClient, N: NeighbourTable> Reconciler<M, N> {
    /// Creates a reconciler over the given metadata source and gateway.
    pub fn new(metadata: Arc<M>, table: Arc<N>) -> Self {
        Self { metadata, table }
    }

    /// Runs one full reconciliation for `link`.
    ///
    /// Aborts (returning the error, with no further mutation) when the
    /// container snapshot, interface resolution, or table listing fails.
    /// Individual add/delete failures are logged, counted in the report,
    /// and do not stop the run.
    pub async fn run(&self, link: &str, trace_id: &str) -> Result<ReconcileReport, SyncError> {
        // 스냅샷 조회 실패 시 런 전체 중단
        let containers = self.metadata.list_containers().await?;
        let desired = DesiredAddresses::extract(link, &containers);

        // 유효한 인덱스 없이는 어떤 add/delete도 시도하지 않음
        let ifindex = self.table.resolve_ifindex(desired.link()).await?;

        debug!(
            trace_id,
            link = desired.link(),
            ifindex,
            desired = desired.len(),
            containers = containers.len(),
            "reconciling proxy neighbour table"
        );

        let mut add_failures = 0;
        for ip in desired.iter() {
            if let Err(e) = self.table.add_proxy(ifindex, *ip).await {
                warn!(trace_id, ip = %ip, error = %e, "failed to add proxy neighbour entry");
                add_failures += 1;
            }
        }

        // 신뢰할 수 있는 현재 뷰 없이는 삭제하지 않음
        let current = self.table.list_proxy(ifindex).await?;

        let mut deleted = 0;
        let mut delete_failures = 0;
        for entry in &current {
            if !entry.is_managed(ifindex) {
                continue;
            }
            if desired.contains(&entry.ip) {
                continue;
            }
            match self.table.del_proxy(ifindex, entry.ip).await {
                Ok(()) => {
                    debug!(trace_id, ip = %entry.ip, "pruned stale proxy neighbour entry");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(trace_id, ip = %entry.ip, error = %e, "failed to delete proxy neighbour entry");
                    delete_failures += 1;
                }
            }
        }

        Ok(ReconcileReport {
            link: desired.link().to_owned(),
            ifindex,
            desired: desired.len(),
            deleted,
            add_failures,
            delete_failures,
        })
    }
}
