// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint descriptors.
//!
//! A [`ChannelDef`] tells a peer how to reach one transport endpoint; a [`ChannelSource`] lists
//! every endpoint a publisher or service exposes for the same logical channel. Both travel inside
//! `TopicInfo`/`ServiceInfo` records, so validity and equality here are part of the contract
//! other processes rely on.

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

bitflags! {
    /// Set of transport types, used to request several transports at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChannelTypes: u32 {
        const TCP = 1;
        const UDP = 1 << 1;
        const UDS = 1 << 2;
        const SHM = 1 << 3;
        const WS = 1 << 4;
    }
}

impl ChannelTypes {
    /// Union of several requests.
    pub fn union_of(types: impl IntoIterator<Item = ChannelTypes>) -> Self {
        types.into_iter().fold(Self::empty(), |acc, t| acc | t)
    }

    /// Contained types in ascending flag order.
    pub fn types(self) -> impl Iterator<Item = ChannelType> {
        ChannelType::ALL
            .into_iter()
            .filter(move |t| self.contains(t.as_flag()))
    }
}

/// Every transport type this crate knows about.
pub fn all_channel_types() -> ChannelTypes {
    ChannelTypes::all()
}

/// A single transport type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Tcp,
    Udp,
    Uds,
    Shm,
    Ws,
}

impl ChannelType {
    pub const ALL: [ChannelType; 5] = [
        ChannelType::Tcp,
        ChannelType::Udp,
        ChannelType::Uds,
        ChannelType::Shm,
        ChannelType::Ws,
    ];

    pub fn as_flag(self) -> ChannelTypes {
        match self {
            Self::Tcp => ChannelTypes::TCP,
            Self::Udp => ChannelTypes::UDP,
            Self::Uds => ChannelTypes::UDS,
            Self::Shm => ChannelTypes::SHM,
            Self::Ws => ChannelTypes::WS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Uds => "uds",
            Self::Shm => "shm",
            Self::Ws => "ws",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// IP endpoint. The address is kept as text so that descriptors received from other processes
/// can be validated instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpEndpoint {
    pub ip: String,
    pub port: u16,
}

impl IpEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid ip address '{}'", self.ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for IpEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Unix domain socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UdsEndpoint {
    pub path: String,
    /// Linux abstract namespace (no filesystem entry).
    #[serde(default)]
    pub abstract_namespace: bool,
}

/// Access mode of a shared-memory segment, as seen by the side that opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShmMode {
    #[default]
    ReadOnly,
    Writable,
}

/// Shared-memory segment descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShmEndpoint {
    pub mode: ShmMode,
    /// Total segment size in bytes (header included).
    pub size: u64,
    /// Segment identity (UUID text).
    pub guid: String,
    /// Platform handle; on POSIX the segment name passed to `shm_open`.
    #[serde(default)]
    pub handle: Option<String>,
}

impl ShmEndpoint {
    fn is_valid(&self) -> bool {
        self.size > 0 && uuid::Uuid::parse_str(&self.guid).is_ok()
    }
}

/// One transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelDef {
    Tcp(IpEndpoint),
    Udp(IpEndpoint),
    Uds(UdsEndpoint),
    Shm(ShmEndpoint),
    Ws(IpEndpoint),
}

impl ChannelDef {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Tcp(_) => ChannelType::Tcp,
            Self::Udp(_) => ChannelType::Udp,
            Self::Uds(_) => ChannelType::Uds,
            Self::Shm(_) => ChannelType::Shm,
            Self::Ws(_) => ChannelType::Ws,
        }
    }

    /// The endpoint parses to a concrete address, or is a well-formed segment descriptor.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Tcp(ep) | Self::Udp(ep) | Self::Ws(ep) => ep.socket_addr().is_ok(),
            Self::Uds(ep) => !ep.path.is_empty() || ep.abstract_namespace,
            Self::Shm(ep) => ep.is_valid(),
        }
    }

    /// Semantic equality: resolved address for IP transports, path plus namespace flag for
    /// UDS, guid plus handle for shared memory. Defs of different types never compare equal.
    pub fn is_same(&self, other: &ChannelDef) -> bool {
        match (self, other) {
            (Self::Tcp(a), Self::Tcp(b))
            | (Self::Udp(a), Self::Udp(b))
            | (Self::Ws(a), Self::Ws(b)) => match (a.socket_addr(), b.socket_addr()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
            (Self::Uds(a), Self::Uds(b)) => {
                a.path == b.path && a.abstract_namespace == b.abstract_namespace
            }
            (Self::Shm(a), Self::Shm(b)) => a.guid == b.guid && a.handle == b.handle,
            _ => false,
        }
    }

    /// Socket address of an IP endpoint.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        match self {
            Self::Tcp(ep) | Self::Udp(ep) | Self::Ws(ep) => ep.socket_addr(),
            other => Err(Error::InvalidArgument(format!(
                "{} channel has no ip endpoint",
                other.channel_type()
            ))),
        }
    }
}

impl fmt::Display for ChannelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(ep) | Self::Udp(ep) | Self::Ws(ep) => {
                write!(f, "{}://{}:{}", self.channel_type(), ep.ip, ep.port)
            }
            Self::Uds(ep) if ep.abstract_namespace => write!(f, "uds://@{}", ep.path),
            Self::Uds(ep) => write!(f, "uds://{}", ep.path),
            Self::Shm(ep) => write!(f, "shm://{} ({} bytes)", ep.guid, ep.size),
        }
    }
}

/// Ordered list of endpoints for one logical channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSource {
    pub channel_defs: Vec<ChannelDef>,
}

impl ChannelSource {
    pub fn new(channel_defs: Vec<ChannelDef>) -> Self {
        Self { channel_defs }
    }

    pub fn is_empty(&self) -> bool {
        self.channel_defs.is_empty()
    }

    /// Non-empty and every member is valid.
    pub fn is_valid(&self) -> bool {
        !self.channel_defs.is_empty() && self.channel_defs.iter().all(ChannelDef::is_valid)
    }

    /// Pairwise semantic equality, order included.
    pub fn is_same(&self, other: &ChannelSource) -> bool {
        self.channel_defs.len() == other.channel_defs.len()
            && self
                .channel_defs
                .iter()
                .zip(&other.channel_defs)
                .all(|(a, b)| a.is_same(b))
    }

    /// Union of the member types.
    pub fn channel_types(&self) -> ChannelTypes {
        ChannelTypes::union_of(self.channel_defs.iter().map(|d| d.channel_type().as_flag()))
    }

    /// First member whose type is in `types`.
    pub fn find(&self, types: ChannelTypes) -> Option<&ChannelDef> {
        self.channel_defs
            .iter()
            .find(|d| types.contains(d.channel_type().as_flag()))
    }
}

impl fmt::Display for ChannelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel_defs.is_empty() {
            return f.write_str("-");
        }
        for (i, def) in self.channel_defs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", def)?;
        }
        Ok(())
    }
}

impl From<ChannelDef> for ChannelSource {
    fn from(def: ChannelDef) -> Self {
        Self::new(vec![def])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(ip: &str, port: u16) -> ChannelDef {
        ChannelDef::Tcp(IpEndpoint::new(ip, port))
    }

    fn shm(guid: &str) -> ChannelDef {
        ChannelDef::Shm(ShmEndpoint {
            mode: ShmMode::ReadOnly,
            size: 4096,
            guid: guid.into(),
            handle: Some(format!("/rdv_{}", guid)),
        })
    }

    const GUID: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    #[test]
    fn test_ip_defs_validate_by_parsing() {
        assert!(tcp("127.0.0.1", 8881).is_valid());
        assert!(tcp("::1", 8881).is_valid());
        assert!(ChannelDef::Udp(IpEndpoint::new("10.0.0.2", 0)).is_valid());
        assert!(!tcp("localhost", 8881).is_valid());
        assert!(!tcp("256.0.0.1", 8881).is_valid());
        assert!(!ChannelDef::Ws(IpEndpoint::new("", 80)).is_valid());
    }

    #[test]
    fn test_uds_empty_path_requires_abstract_namespace() {
        let empty = UdsEndpoint {
            path: String::new(),
            abstract_namespace: false,
        };
        assert!(!ChannelDef::Uds(empty.clone()).is_valid());
        assert!(ChannelDef::Uds(UdsEndpoint {
            abstract_namespace: true,
            ..empty
        })
        .is_valid());
        assert!(ChannelDef::Uds(UdsEndpoint {
            path: "/tmp/rdv.sock".into(),
            abstract_namespace: false,
        })
        .is_valid());
    }

    #[test]
    fn test_shm_descriptor_validity() {
        assert!(shm(GUID).is_valid());
        assert!(!shm("not-a-guid").is_valid());
        let mut zero = shm(GUID);
        if let ChannelDef::Shm(ep) = &mut zero {
            ep.size = 0;
        }
        assert!(!zero.is_valid());
    }

    #[test]
    fn test_source_validity() {
        assert!(!ChannelSource::default().is_valid());
        assert!(ChannelSource::new(vec![tcp("127.0.0.1", 1), shm(GUID)]).is_valid());
        assert!(!ChannelSource::new(vec![tcp("127.0.0.1", 1), tcp("nope", 2)]).is_valid());
    }

    #[test]
    fn test_same_def_is_semantic() {
        assert!(tcp("::1", 80).is_same(&tcp("0:0:0:0:0:0:0:1", 80)));
        assert!(!tcp("127.0.0.1", 80).is_same(&tcp("127.0.0.1", 81)));
        assert!(shm(GUID).is_same(&shm(GUID)));
    }

    #[test]
    fn test_same_def_is_reflexive_and_symmetric() {
        let defs = [
            tcp("127.0.0.1", 80),
            ChannelDef::Udp(IpEndpoint::new("127.0.0.1", 80)),
            ChannelDef::Ws(IpEndpoint::new("127.0.0.1", 80)),
            ChannelDef::Uds(UdsEndpoint {
                path: "a".into(),
                abstract_namespace: true,
            }),
            shm(GUID),
        ];
        for (i, a) in defs.iter().enumerate() {
            assert!(a.is_same(a));
            for (j, b) in defs.iter().enumerate() {
                assert_eq!(a.is_same(b), b.is_same(a));
                // Same payload, different transport: never equal.
                if i != j {
                    assert!(!a.is_same(b), "{} vs {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_uds_namespace_flag_matters() {
        let a = ChannelDef::Uds(UdsEndpoint {
            path: "rdv".into(),
            abstract_namespace: true,
        });
        let b = ChannelDef::Uds(UdsEndpoint {
            path: "rdv".into(),
            abstract_namespace: false,
        });
        assert!(!a.is_same(&b));
    }

    #[test]
    fn test_channel_types_union() {
        let union = ChannelTypes::union_of([ChannelTypes::TCP, ChannelTypes::SHM, ChannelTypes::TCP]);
        assert_eq!(union, ChannelTypes::TCP | ChannelTypes::SHM);
        assert_eq!(
            union.types().collect::<Vec<_>>(),
            vec![ChannelType::Tcp, ChannelType::Shm]
        );
        assert_eq!(all_channel_types().types().count(), ChannelType::ALL.len());
    }

    #[test]
    fn test_source_find_respects_order() {
        let source = ChannelSource::new(vec![shm(GUID), tcp("127.0.0.1", 9)]);
        assert_eq!(
            source.find(ChannelTypes::TCP | ChannelTypes::SHM),
            Some(&source.channel_defs[0])
        );
        assert_eq!(source.find(ChannelTypes::TCP), Some(&source.channel_defs[1]));
        assert!(source.find(ChannelTypes::UDP).is_none());
        assert_eq!(source.channel_types(), ChannelTypes::TCP | ChannelTypes::SHM);
    }

    #[test]
    fn test_def_json_is_tagged() {
        let json = serde_json::to_string(&tcp("127.0.0.1", 80)).unwrap();
        assert_eq!(json, r#"{"type":"tcp","ip":"127.0.0.1","port":80}"#);
    }

    #[test]
    fn test_source_display() {
        let source = ChannelSource::new(vec![tcp("127.0.0.1", 80), tcp("10.0.0.2", 81)]);
        assert_eq!(source.to_string(), "tcp://127.0.0.1:80,tcp://10.0.0.2:81");
        assert_eq!(ChannelSource::default().to_string(), "-");
    }
}
