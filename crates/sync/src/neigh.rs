//! Kernel proxy neighbour table access.
//!
//! The [`NeighbourTable`] trait is the gateway the reconciler works
//! against: resolve an interface name to its index, dump the proxy
//! neighbour entries of both address families, and add/delete single proxy
//! entries. [`RtnetlinkTable`] implements it over an rtnetlink handle;
//! `MockNeighbourTable` keeps an in-memory table for tests.
//!
//! Kernel equivalents:
//!
//! ```text
//! ip [-6] neigh add proxy {addr} dev {link}
//! ip [-6] neigh list proxy
//! ip [-6] neigh del proxy {addr} dev {link}
//! ```

use std::future::Future;
use std::net::IpAddr;
use std::num::NonZeroI32;

use futures::{StreamExt, TryStreamExt};
use netlink_packet_core::{NLM_F_DUMP, NLM_F_REQUEST, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourFlag, NeighbourMessage, NeighbourState,
};
use netlink_packet_route::route::RouteType;
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use tracing::trace;

use crate::error::SyncError;

/// One proxy neighbour table entry as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyNeighbour {
    /// Owning interface index.
    pub ifindex: u32,
    /// The proxied address; the family is implied by the variant.
    pub ip: IpAddr,
    /// Link-layer resolution state.
    pub state: NeighbourState,
    /// Entry type.
    pub kind: RouteType,
    /// Entry flags.
    pub flags: Vec<NeighbourFlag>,
}

impl ProxyNeighbour {
    /// Whether this entry carries the signature of an entry owned by this
    /// system: a proxy-only placeholder on the given interface with no
    /// link-layer resolution and unspecified type.
    ///
    /// Entries failing any single check are never touched by the
    /// reconciler, regardless of IP overlap.
    pub fn is_managed(&self, ifindex: u32) -> bool {
        if self.ifindex != ifindex {
            return false;
        }
        if self.state != NeighbourState::None {
            return false;
        }
        if self.kind != RouteType::Unspec {
            return false;
        }
        if self.flags != [NeighbourFlag::Proxy] {
            return false;
        }
        true
    }
}

/// Gateway to the kernel neighbour subsystem.
///
/// Add/delete derive the address family solely from the shape of the
/// supplied `IpAddr`; callers never pass a family flag.
pub trait NeighbourTable: Send + Sync + 'static {
    /// Resolves an interface name to its index.
    ///
    /// Returns [`SyncError::InterfaceNotFound`] when no such interface
    /// exists on the host.
    fn resolve_ifindex(&self, link: &str) -> impl Future<Output = Result<u32, SyncError>> + Send;

    /// Dumps the proxy neighbour entries of both address families.
    ///
    /// The dump is returned unfiltered; distinguishing managed entries is
    /// the caller's responsibility (see [`ProxyNeighbour::is_managed`]).
    fn list_proxy(
        &self,
        ifindex: u32,
    ) -> impl Future<Output = Result<Vec<ProxyNeighbour>, SyncError>> + Send;

    /// Adds one proxy entry. Re-adding an existing address is a no-op.
    fn add_proxy(
        &self,
        ifindex: u32,
        ip: IpAddr,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Deletes one proxy entry.
    fn del_proxy(
        &self,
        ifindex: u32,
        ip: IpAddr,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

fn family_of(ip: &IpAddr) -> AddressFamily {
    match ip {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn destination_of(ip: IpAddr) -> NeighbourAttribute {
    NeighbourAttribute::Destination(match ip {
        IpAddr::V4(v4) => NeighbourAddress::Inet(v4),
        IpAddr::V6(v6) => NeighbourAddress::Inet6(v6),
    })
}

fn error_code(err: &netlink_packet_core::ErrorMessage) -> i32 {
    err.code.map(NonZeroI32::get).unwrap_or(0)
}

/// Production neighbour table backed by an rtnetlink handle.
pub struct RtnetlinkTable {
    handle: rtnetlink::Handle,
}

impl RtnetlinkTable {
    /// Opens a netlink connection, spawns its driver task, and returns a
    /// table backed by it.
    pub fn connect() -> Result<Self, SyncError> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| SyncError::Netlink(format!("failed to create netlink connection: {e}")))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Wraps an existing handle (the connection must already be driven).
    pub fn from_handle(handle: rtnetlink::Handle) -> Self {
        Self { handle }
    }

    /// Dumps the proxy entries of one address family.
    ///
    /// The dump request carries the proxy flag so the kernel walks the
    /// proxy table (`pneigh`) instead of the regular neighbour table.
    async fn dump_proxy_family(
        &self,
        ifindex: u32,
        family: AddressFamily,
    ) -> Result<Vec<ProxyNeighbour>, SyncError> {
        let mut message = NeighbourMessage::default();
        message.header.family = family;
        message.header.ifindex = ifindex;
        message.header.flags = vec![NeighbourFlag::Proxy];

        let mut request = NetlinkMessage::from(RouteNetlinkMessage::GetNeighbour(message));
        request.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

        let mut handle = self.handle.clone();
        let mut response = handle
            .request(request)
            .map_err(|e| SyncError::Netlink(format!("neighbour dump request failed: {e}")))?;

        let mut entries = Vec::new();
        while let Some(message) = response.next().await {
            match message.payload {
                NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
                    if let Some(entry) = parse_neighbour(&neigh) {
                        entries.push(entry);
                    }
                }
                NetlinkPayload::Error(err) if err.code.is_some() => {
                    return Err(SyncError::Netlink(format!(
                        "neighbour dump failed: code {}",
                        error_code(&err),
                    )));
                }
                _ => {}
            }
        }

        trace!(ifindex, ?family, count = entries.len(), "proxy neighbour dump");
        Ok(entries)
    }
}

/// Converts a kernel neighbour message into a [`ProxyNeighbour`].
///
/// Messages without a destination address (e.g. bridge fdb entries) are
/// skipped.
fn parse_neighbour(message: &NeighbourMessage) -> Option<ProxyNeighbour> {
    let ip = message.attributes.iter().find_map(|attr| match attr {
        NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => Some(IpAddr::V4(*v4)),
        NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => Some(IpAddr::V6(*v6)),
        _ => None,
    })?;

    Some(ProxyNeighbour {
        ifindex: message.header.ifindex,
        ip,
        state: message.header.state,
        kind: message.header.kind,
        flags: message.header.flags.clone(),
    })
}

impl NeighbourTable for RtnetlinkTable {
    async fn resolve_ifindex(&self, link: &str) -> Result<u32, SyncError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(link.to_owned())
            .execute();

        match links.try_next().await {
            Ok(Some(message)) => Ok(message.header.index),
            Ok(None) => Err(SyncError::InterfaceNotFound(link.to_owned())),
            Err(rtnetlink::Error::NetlinkError(err))
                if error_code(&err) == -libc::ENODEV =>
            {
                Err(SyncError::InterfaceNotFound(link.to_owned()))
            }
            Err(e) => Err(SyncError::Netlink(format!(
                "failed to resolve interface {link}: {e}",
            ))),
        }
    }

    async fn list_proxy(&self, ifindex: u32) -> Result<Vec<ProxyNeighbour>, SyncError> {
        let mut entries = self.dump_proxy_family(ifindex, AddressFamily::Inet).await?;
        entries.extend(self.dump_proxy_family(ifindex, AddressFamily::Inet6).await?);
        Ok(entries)
    }

    async fn add_proxy(&self, ifindex: u32, ip: IpAddr) -> Result<(), SyncError> {
        let result = self
            .handle
            .neighbours()
            .add(ifindex, ip)
            .state(NeighbourState::None)
            .flags(vec![NeighbourFlag::Proxy])
            .replace()
            .execute()
            .await;

        match result {
            Ok(()) => Ok(()),
            // 이미 존재하는 엔트리는 무해함
            Err(rtnetlink::Error::NetlinkError(ref err))
                if error_code(err) == -libc::EEXIST =>
            {
                Ok(())
            }
            Err(e) => Err(SyncError::AddEntry {
                ip,
                reason: e.to_string(),
            }),
        }
    }

    async fn del_proxy(&self, ifindex: u32, ip: IpAddr) -> Result<(), SyncError> {
        let mut message = NeighbourMessage::default();
        message.header.family = family_of(&ip);
        message.header.ifindex = ifindex;
        message.header.state = NeighbourState::None;
        message.header.flags = vec![NeighbourFlag::Proxy];
        message.attributes.push(destination_of(ip));

        self.handle
            .neighbours()
            .del(message)
            .execute()
            .await
            .map_err(|e| SyncError::DeleteEntry {
                ip,
                reason: e.to_string(),
            })
    }
}

/// 테스트용 in-memory 네이버 테이블
///
/// 커널 없이 게이트웨이 계약을 시뮬레이션합니다. 등록된 링크 이름만
/// 해석되며, list는 커널처럼 필터링 없이 전체 테이블을 반환합니다.
#[cfg(test)]
pub struct MockNeighbourTable {
    links: std::collections::HashMap<String, u32>,
    entries: std::sync::Mutex<Vec<ProxyNeighbour>>,
    added: std::sync::Mutex<Vec<IpAddr>>,
    deleted: std::sync::Mutex<Vec<IpAddr>>,
    pub fail_resolve: bool,
    pub fail_list: bool,
    pub fail_add: bool,
    pub fail_del: bool,
}

#[cfg(test)]
impl MockNeighbourTable {
    /// 빈 테이블을 생성합니다.
    pub fn new() -> Self {
        Self {
            links: std::collections::HashMap::new(),
            entries: std::sync::Mutex::new(Vec::new()),
            added: std::sync::Mutex::new(Vec::new()),
            deleted: std::sync::Mutex::new(Vec::new()),
            fail_resolve: false,
            fail_list: false,
            fail_add: false,
            fail_del: false,
        }
    }

    /// 해석 가능한 링크를 등록합니다.
    pub fn with_link(mut self, name: &str, ifindex: u32) -> Self {
        self.links.insert(name.to_owned(), ifindex);
        self
    }

    /// 기존 테이블 엔트리를 심습니다.
    pub fn with_entry(self, entry: ProxyNeighbour) -> Self {
        self.entries.lock().unwrap().push(entry);
        self
    }

    pub fn with_failing_resolve(mut self) -> Self {
        self.fail_resolve = true;
        self
    }

    pub fn with_failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn with_failing_add(mut self) -> Self {
        self.fail_add = true;
        self
    }

    pub fn with_failing_del(mut self) -> Self {
        self.fail_del = true;
        self
    }

    /// 관리 시그니처를 가진 엔트리를 생성합니다.
    pub fn managed_entry(ifindex: u32, ip: &str) -> ProxyNeighbour {
        ProxyNeighbour {
            ifindex,
            ip: ip.parse().unwrap(),
            state: NeighbourState::None,
            kind: RouteType::Unspec,
            flags: vec![NeighbourFlag::Proxy],
        }
    }

    /// 현재 테이블 스냅샷을 반환합니다.
    pub fn table(&self) -> Vec<ProxyNeighbour> {
        self.entries.lock().unwrap().clone()
    }

    /// add_proxy로 전달된 주소 목록.
    pub fn added(&self) -> Vec<IpAddr> {
        self.added.lock().unwrap().clone()
    }

    /// del_proxy로 전달된 주소 목록.
    pub fn deleted(&self) -> Vec<IpAddr> {
        self.deleted.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl NeighbourTable for MockNeighbourTable {
    async fn resolve_ifindex(&self, link: &str) -> Result<u32, SyncError> {
        if self.fail_resolve {
            return Err(SyncError::Netlink("mock resolve failure".to_owned()));
        }
        self.links
            .get(link)
            .copied()
            .ok_or_else(|| SyncError::InterfaceNotFound(link.to_owned()))
    }

    async fn list_proxy(&self, _ifindex: u32) -> Result<Vec<ProxyNeighbour>, SyncError> {
        if self.fail_list {
            return Err(SyncError::Netlink("mock list failure".to_owned()));
        }
        // 커널처럼 필터링 없이 전체를 반환 — 필터링은 호출자 책임
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn add_proxy(&self, ifindex: u32, ip: IpAddr) -> Result<(), SyncError> {
        if self.fail_add {
            return Err(SyncError::AddEntry {
                ip,
                reason: "mock add failure".to_owned(),
            });
        }
        self.added.lock().unwrap().push(ip);
        let mut entries = self.entries.lock().unwrap();
        let exists = entries
            .iter()
            .any(|e| e.ifindex == ifindex && e.ip == ip && e.is_managed(ifindex));
        if !exists {
            entries.push(ProxyNeighbour {
                ifindex,
                ip,
                state: NeighbourState::None,
                kind: RouteType::Unspec,
                flags: vec![NeighbourFlag::Proxy],
            });
        }
        Ok(())
    }

    async fn del_proxy(&self, ifindex: u32, ip: IpAddr) -> Result<(), SyncError> {
        if self.fail_del {
            return Err(SyncError::DeleteEntry {
                ip,
                reason: "mock delete failure".to_owned(),
            });
        }
        self.deleted.lock().unwrap().push(ip);
        self.entries
            .lock()
            .unwrap()
            .retain(|e| !(e.ifindex == ifindex && e.ip == ip && e.is_managed(ifindex)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed(ifindex: u32) -> ProxyNeighbour {
        MockNeighbourTable::managed_entry(ifindex, "192.0.2.101")
    }

    #[test]
    fn managed_signature_matches() {
        assert!(managed(7).is_managed(7));
    }

    #[test]
    fn foreign_interface_is_not_managed() {
        assert!(!managed(7).is_managed(8));
    }

    #[test]
    fn resolved_state_is_not_managed() {
        let entry = ProxyNeighbour {
            state: NeighbourState::Reachable,
            ..managed(7)
        };
        assert!(!entry.is_managed(7));
    }

    #[test]
    fn non_unspec_kind_is_not_managed() {
        let entry = ProxyNeighbour {
            kind: RouteType::Unicast,
            ..managed(7)
        };
        assert!(!entry.is_managed(7));
    }

    #[test]
    fn wrong_flags_are_not_managed() {
        let no_flags = ProxyNeighbour {
            flags: Vec::new(),
            ..managed(7)
        };
        assert!(!no_flags.is_managed(7));

        let extra_flags = ProxyNeighbour {
            flags: vec![NeighbourFlag::Proxy, NeighbourFlag::Router],
            ..managed(7)
        };
        assert!(!extra_flags.is_managed(7));
    }

    #[test]
    fn parse_neighbour_reads_destination_and_header() {
        let mut message = NeighbourMessage::default();
        message.header.family = AddressFamily::Inet6;
        message.header.ifindex = 9;
        message.header.state = NeighbourState::None;
        message.header.flags = vec![NeighbourFlag::Proxy];
        message
            .attributes
            .push(destination_of("2001:db8::101".parse().unwrap()));

        let entry = parse_neighbour(&message).unwrap();
        assert_eq!(entry.ifindex, 9);
        assert_eq!(entry.ip, "2001:db8::101".parse::<IpAddr>().unwrap());
        assert!(entry.is_managed(9));
    }

    #[test]
    fn parse_neighbour_skips_messages_without_destination() {
        let message = NeighbourMessage::default();
        assert!(parse_neighbour(&message).is_none());
    }

    #[test]
    fn family_derived_from_address_shape() {
        assert_eq!(
            family_of(&"192.0.2.1".parse().unwrap()),
            AddressFamily::Inet
        );
        assert_eq!(
            family_of(&"2001:db8::1".parse().unwrap()),
            AddressFamily::Inet6
        );
    }

    #[tokio::test]
    async fn mock_table_resolves_registered_links() {
        let table = MockNeighbourTable::new().with_link("vlan10", 7);
        assert_eq!(table.resolve_ifindex("vlan10").await.unwrap(), 7);
        assert!(matches!(
            table.resolve_ifindex("vlan99").await,
            Err(SyncError::InterfaceNotFound(_)),
        ));
    }

    #[tokio::test]
    async fn mock_table_add_is_idempotent() {
        let table = MockNeighbourTable::new().with_link("vlan10", 7);
        let ip: IpAddr = "192.0.2.101".parse().unwrap();
        table.add_proxy(7, ip).await.unwrap();
        table.add_proxy(7, ip).await.unwrap();
        assert_eq!(table.table().len(), 1);
        assert_eq!(table.added().len(), 2);
    }

    #[tokio::test]
    async fn mock_table_delete_removes_managed_entry_only() {
        let foreign = ProxyNeighbour {
            flags: Vec::new(),
            ..managed(7)
        };
        let table = MockNeighbourTable::new()
            .with_entry(managed(7))
            .with_entry(foreign.clone());

        table.del_proxy(7, "192.0.2.101".parse().unwrap()).await.unwrap();

        let remaining = table.table();
        assert_eq!(remaining, vec![foreign]);
    }
}
