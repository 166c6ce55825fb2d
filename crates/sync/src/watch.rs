//! Link state watching via rtnetlink multicast.
//!
//! [`LinkWatcher`] joins the `RTNLGRP_LINK` multicast group and turns
//! `RTM_NEWLINK` messages into [`LinkEvent`]s on a bounded mpsc channel.
//! The watcher never waits on reconciliation — consumers drain the channel
//! at their own pace, and slow consumers exert backpressure on the pump
//! task, not on the kernel socket.

use futures::StreamExt;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::{LinkAttribute, LinkMessage, State};
use netlink_sys::{AsyncSocket, SocketAddr};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use proxyneigh_core::error::{ProxyneighError, ServiceError};
use proxyneigh_core::event::LinkEvent;
use proxyneigh_core::service::{HealthStatus, Service};

/// rtnetlink link notification multicast group (RTNLGRP_LINK).
const RTNLGRP_LINK: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchState {
    Initialized,
    Running,
    Stopped,
}

/// Watches kernel link state transitions and emits [`LinkEvent`]s.
pub struct LinkWatcher {
    state: WatchState,
    event_tx: mpsc::Sender<LinkEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkWatcher {
    /// Creates a watcher and the receiving half of its event channel.
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(channel_capacity);
        (
            Self {
                state: WatchState::Initialized,
                event_tx,
                tasks: Vec::new(),
            },
            event_rx,
        )
    }

    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            WatchState::Initialized => "initialized",
            WatchState::Running => "running",
            WatchState::Stopped => "stopped",
        }
    }
}

/// Converts an `RTM_NEWLINK` message into a [`LinkEvent`].
///
/// Messages without an interface name attribute are skipped. The
/// operational state comes from the `OperState` attribute; anything other
/// than `Up` yields `oper_up == false`.
fn link_event(message: &LinkMessage) -> Option<LinkEvent> {
    let mut name = None;
    let mut oper_up = false;

    for attr in &message.attributes {
        match attr {
            LinkAttribute::IfName(ifname) => name = Some(ifname.clone()),
            LinkAttribute::OperState(state) => oper_up = *state == State::Up,
            _ => {}
        }
    }

    Some(LinkEvent::new(name?, message.header.index, oper_up))
}

impl Service for LinkWatcher {
    async fn start(&mut self) -> Result<(), ProxyneighError> {
        if self.state == WatchState::Running {
            return Err(ServiceError::AlreadyRunning.into());
        }

        let (mut connection, _handle, mut messages) =
            rtnetlink::new_connection().map_err(|e| {
                ServiceError::InitFailed(format!("failed to create netlink connection: {e}"))
            })?;

        // 링크 알림 멀티캐스트 그룹 가입
        let addr = SocketAddr::new(0, 1 << (RTNLGRP_LINK - 1));
        connection
            .socket_mut()
            .socket_mut()
            .bind(&addr)
            .map_err(|e| {
                ServiceError::InitFailed(format!(
                    "failed to join RTNLGRP_LINK multicast group: {e}"
                ))
            })?;

        let connection_task = tokio::spawn(connection);

        let event_tx = self.event_tx.clone();
        let pump_task = tokio::spawn(async move {
            while let Some((message, _addr)) = messages.next().await {
                let NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) =
                    message.payload
                else {
                    continue;
                };

                let Some(event) = link_event(&link) else {
                    trace!("skipping link message without interface name");
                    continue;
                };

                debug!(
                    link = %event.link,
                    ifindex = event.ifindex,
                    oper_up = event.oper_up,
                    trace_id = %event.metadata.trace_id,
                    "link state transition"
                );

                if event_tx.send(event).await.is_err() {
                    info!("link event receiver dropped, stopping watcher loop");
                    break;
                }
            }
        });

        self.tasks.push(connection_task);
        self.tasks.push(pump_task);
        self.state = WatchState::Running;
        info!("link watcher started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProxyneighError> {
        if self.state != WatchState::Running {
            return Err(ServiceError::NotRunning.into());
        }

        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = WatchState::Stopped;
        info!("link watcher stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            WatchState::Running => HealthStatus::Healthy,
            WatchState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            WatchState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}
