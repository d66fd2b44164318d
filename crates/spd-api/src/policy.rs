// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Policy classification, add requests, verdicts and configuration.

use super::AddrFamily;
use super::Direction;
use super::PolicyIndex;
use super::SaId;
use super::SaIndex;
use super::cmd::ValidationError;
use super::ip::AddrRange;
use super::ip::PortRange;
use super::ip::Protocol;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The default capacity of the policy pool.
pub const SPD_DEF_MAX_POLICIES: u32 = 1 << 20;

/// What to do with a packet that matches a policy.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Pass the packet without protection.
    Bypass = 0,
    /// Drop the packet.
    Discard = 1,
    /// Trigger negotiation of a security association.
    Resolve = 2,
    /// Apply the policy's security association.
    Protect = 3,
}

impl PolicyAction {
    /// Does this action consult the policy's security association?
    pub fn uses_sa(self) -> bool {
        matches!(self, Self::Resolve | Self::Protect)
    }
}

impl FromStr for PolicyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bypass" => Ok(Self::Bypass),
            "discard" => Ok(Self::Discard),
            "resolve" => Ok(Self::Resolve),
            "protect" => Ok(Self::Protect),
            _ => Err(format!("invalid action: {s}")),
        }
    }
}

impl Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Bypass => "BYPASS",
            Self::Discard => "DISCARD",
            Self::Resolve => "RESOLVE",
            Self::Protect => "PROTECT",
        };
        write!(f, "{s}")
    }
}

/// The classification of a policy by direction, address family and,
/// for inbound policies, action.
///
/// Outbound policies of every action share one type per family.
/// Inbound traffic never triggers negotiation, so there is no inbound
/// resolve type.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum PolicyType {
    Ip4Outbound,
    Ip6Outbound,
    Ip4InboundProtect,
    Ip4InboundBypass,
    Ip4InboundDiscard,
    Ip6InboundProtect,
    Ip6InboundBypass,
    Ip6InboundDiscard,
}

impl PolicyType {
    pub fn new(
        direction: Direction,
        family: AddrFamily,
        action: PolicyAction,
    ) -> Result<Self, ValidationError> {
        use AddrFamily::*;
        use Direction::*;
        use PolicyAction::*;

        let ty = match (direction, family, action) {
            (Out, V4, _) => Self::Ip4Outbound,
            (Out, V6, _) => Self::Ip6Outbound,
            (In, V4, Protect) => Self::Ip4InboundProtect,
            (In, V4, Bypass) => Self::Ip4InboundBypass,
            (In, V4, Discard) => Self::Ip4InboundDiscard,
            (In, V6, Protect) => Self::Ip6InboundProtect,
            (In, V6, Bypass) => Self::Ip6InboundBypass,
            (In, V6, Discard) => Self::Ip6InboundDiscard,
            (In, _, Resolve) => {
                return Err(ValidationError::InvalidType { direction, action });
            }
        };

        Ok(ty)
    }

    pub fn direction(self) -> Direction {
        match self {
            Self::Ip4Outbound | Self::Ip6Outbound => Direction::Out,
            _ => Direction::In,
        }
    }

    pub fn family(self) -> AddrFamily {
        match self {
            Self::Ip4Outbound
            | Self::Ip4InboundProtect
            | Self::Ip4InboundBypass
            | Self::Ip4InboundDiscard => AddrFamily::V4,
            _ => AddrFamily::V6,
        }
    }
}

impl Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ip4Outbound => "ip4-outbound",
            Self::Ip6Outbound => "ip6-outbound",
            Self::Ip4InboundProtect => "ip4-inbound-protect",
            Self::Ip4InboundBypass => "ip4-inbound-bypass",
            Self::Ip4InboundDiscard => "ip4-inbound-discard",
            Self::Ip6InboundProtect => "ip6-inbound-protect",
            Self::Ip6InboundBypass => "ip6-inbound-bypass",
            Self::Ip6InboundDiscard => "ip6-inbound-discard",
        };
        write!(f, "{s}")
    }
}

/// The action taken when no policy matches a packet.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Bypass,
    #[default]
    Discard,
}

impl From<DefaultAction> for PolicyAction {
    fn from(def: DefaultAction) -> Self {
        match def {
            DefaultAction::Bypass => PolicyAction::Bypass,
            DefaultAction::Discard => PolicyAction::Discard,
        }
    }
}

impl FromStr for DefaultAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bypass" => Ok(Self::Bypass),
            "discard" => Ok(Self::Discard),
            _ => Err(format!("invalid default action: {s}")),
        }
    }
}

/// A request to install a policy.
///
/// ```
/// # use spd_api::PolicyReq;
/// let req: PolicyReq = "dir=out action=protect priority=10 \
///     local=10.0.0.0/24 remote=any4 sa=1"
///     .parse()
///     .unwrap();
/// assert!(req.validate().is_ok());
/// ```
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PolicyReq {
    #[serde(rename = "dir")]
    pub direction: Direction,
    pub action: PolicyAction,
    pub priority: i32,
    #[serde(rename = "proto", default)]
    pub protocol: Protocol,
    pub local: AddrRange,
    pub remote: AddrRange,
    #[serde(rename = "lport", default)]
    pub local_ports: PortRange,
    #[serde(rename = "rport", default)]
    pub remote_ports: PortRange,
    #[serde(rename = "sa", default, skip_serializing_if = "Option::is_none")]
    pub sa_id: Option<SaId>,
}

impl PolicyReq {
    pub fn family(&self) -> AddrFamily {
        self.local.family()
    }

    /// Check the request's internal consistency and derive its type.
    /// SA resolution is the engine's job.
    pub fn validate(&self) -> Result<PolicyType, ValidationError> {
        let (lf, rf) = (self.local.family(), self.remote.family());
        if lf != rf {
            return Err(ValidationError::MixedFamily(lf, rf));
        }

        if self.action == PolicyAction::Protect && self.sa_id.is_none() {
            return Err(ValidationError::MissingSa);
        }

        PolicyType::new(self.direction, lf, self.action)
    }
}

impl FromStr for PolicyReq {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut direction = None;
        let mut action = None;
        let mut priority = None;
        let mut protocol = None;
        let mut local = None;
        let mut remote = None;
        let mut local_ports = None;
        let mut remote_ports = None;
        let mut sa_id = None;

        for token in s.split_whitespace() {
            match token.split_once('=') {
                None => {
                    return Err(format!("bad token: {token}"));
                }

                Some(("dir", val)) => {
                    direction = Some(val.parse::<Direction>()?);
                }

                Some(("action", val)) => {
                    action = Some(val.parse::<PolicyAction>()?);
                }

                Some(("priority", val)) => {
                    priority = Some(val.parse::<i32>().map_err(|e| {
                        format!("bad priority: '{val}' {e}")
                    })?);
                }

                Some(("proto", val)) => {
                    protocol = Some(val.parse::<Protocol>()?);
                }

                Some(("local", val)) => {
                    local = Some(val.parse::<AddrRange>()?);
                }

                Some(("remote", val)) => {
                    remote = Some(val.parse::<AddrRange>()?);
                }

                Some(("lport", val)) => {
                    local_ports = Some(val.parse::<PortRange>()?);
                }

                Some(("rport", val)) => {
                    remote_ports = Some(val.parse::<PortRange>()?);
                }

                Some(("sa", val)) => {
                    sa_id = Some(
                        val.parse::<SaId>()
                            .map_err(|e| format!("bad sa: '{val}' {e}"))?,
                    );
                }

                Some((_, _)) => {
                    return Err(format!("invalid key: {token}"));
                }
            }
        }

        let Some(direction) = direction else {
            return Err("missing direction ('dir') key".to_string());
        };

        let Some(action) = action else {
            return Err("missing 'action' key".to_string());
        };

        let Some(priority) = priority else {
            return Err("missing 'priority' key".to_string());
        };

        let Some(local) = local else {
            return Err("missing 'local' key".to_string());
        };

        let Some(remote) = remote else {
            return Err("missing 'remote' key".to_string());
        };

        Ok(PolicyReq {
            direction,
            action,
            priority,
            protocol: protocol.unwrap_or(Protocol::ANY),
            local,
            remote,
            local_ports: local_ports.unwrap_or(PortRange::ANY),
            remote_ports: remote_ports.unwrap_or(PortRange::ANY),
            sa_id,
        })
    }
}

impl Display for PolicyReq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "dir={} action={} priority={} proto={} local={} remote={} \
             lport={} rport={}",
            self.direction,
            self.action,
            self.priority,
            self.protocol,
            self.local,
            self.remote,
            self.local_ports,
            self.remote_ports,
        )?;

        if let Some(sa_id) = self.sa_id {
            write!(f, " sa={sa_id}")?;
        }

        Ok(())
    }
}

/// The outcome of classifying one packet.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Verdict {
    pub action: PolicyAction,
    /// The matching policy, or `None` when the default action applied.
    pub policy: Option<PolicyIndex>,
    /// The resolved SA of a matching `protect`/`resolve` policy.
    pub sa_index: Option<SaIndex>,
}

impl Verdict {
    pub fn default_action(action: DefaultAction) -> Self {
        Self { action: action.into(), policy: None, sa_index: None }
    }

    pub fn is_default(&self) -> bool {
        self.policy.is_none()
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.policy, self.sa_index) {
            (None, _) => write!(f, "{} (default)", self.action),
            (Some(idx), None) => write!(f, "{} (policy {idx})", self.action),
            (Some(idx), Some(sa)) => {
                write!(f, "{} (policy {idx}, sa {sa})", self.action)
            }
        }
    }
}

/// How selector ranges are turned into hash masks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskStrategyKind {
    /// Keep the bits common to both ends of a range.
    #[default]
    CommonPrefix,
    /// Keep every bit of single-value fields; wildcard all others.
    Exact,
}

/// The configuration of one SPD instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SpdConfig {
    pub id: u32,
    pub default_in: DefaultAction,
    pub default_out: DefaultAction,
    pub max_policies: u32,
    pub mask_strategy: MaskStrategyKind,
}

impl SpdConfig {
    pub fn default_for(&self, dir: Direction) -> DefaultAction {
        match dir {
            Direction::In => self.default_in,
            Direction::Out => self.default_out,
        }
    }
}

impl Default for SpdConfig {
    fn default() -> Self {
        Self {
            id: 0,
            default_in: DefaultAction::default(),
            default_out: DefaultAction::default(),
            max_policies: SPD_DEF_MAX_POLICIES,
            mask_strategy: MaskStrategyKind::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_constructor() {
        use AddrFamily::*;
        use Direction::*;
        use PolicyAction::*;

        for action in [Bypass, Discard, Resolve, Protect] {
            assert_eq!(
                PolicyType::new(Out, V4, action),
                Ok(PolicyType::Ip4Outbound)
            );
            assert_eq!(
                PolicyType::new(Out, V6, action),
                Ok(PolicyType::Ip6Outbound)
            );
        }

        assert_eq!(
            PolicyType::new(In, V6, Bypass),
            Ok(PolicyType::Ip6InboundBypass)
        );
        assert_eq!(
            PolicyType::new(In, V4, Resolve),
            Err(ValidationError::InvalidType {
                direction: In,
                action: Resolve
            })
        );

        let ty = PolicyType::Ip6InboundProtect;
        assert_eq!(ty.direction(), In);
        assert_eq!(ty.family(), V6);
    }

    #[test]
    fn parse_policy_req() {
        let req: PolicyReq = "dir=in action=bypass priority=-5 proto=tcp \
                              local=fd00::/64 remote=any6 lport=22"
            .parse()
            .unwrap();
        assert_eq!(req.direction, Direction::In);
        assert_eq!(req.priority, -5);
        assert_eq!(req.protocol, Protocol::TCP);
        assert_eq!(req.local_ports, PortRange::exact(22));
        assert_eq!(req.remote_ports, PortRange::ANY);
        assert_eq!(req.sa_id, None);
        assert_eq!(req.validate(), Ok(PolicyType::Ip6InboundBypass));

        let again: PolicyReq = req.to_string().parse().unwrap();
        assert_eq!(req, again);
    }

    #[test]
    fn parse_policy_req_errors() {
        assert!("action=bypass priority=1 local=any4 remote=any4"
            .parse::<PolicyReq>()
            .is_err());
        assert!("dir=out action=bypass priority=1 local=any4 remote=any4 x=1"
            .parse::<PolicyReq>()
            .is_err());
        assert!("dir=out bogus".parse::<PolicyReq>().is_err());
    }

    #[test]
    fn validate_policy_req() {
        let mixed: PolicyReq =
            "dir=out action=bypass priority=1 local=any4 remote=any6"
                .parse()
                .unwrap();
        assert_eq!(
            mixed.validate(),
            Err(ValidationError::MixedFamily(AddrFamily::V4, AddrFamily::V6))
        );

        let no_sa: PolicyReq =
            "dir=out action=protect priority=1 local=any4 remote=any4"
                .parse()
                .unwrap();
        assert_eq!(no_sa.validate(), Err(ValidationError::MissingSa));
    }

    #[test]
    fn config_from_toml() {
        let cfg: SpdConfig = toml::from_str(
            r#"
            id = 7
            default_in = "bypass"
            mask_strategy = "exact"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.id, 7);
        assert_eq!(cfg.default_for(Direction::In), DefaultAction::Bypass);
        assert_eq!(cfg.default_for(Direction::Out), DefaultAction::Discard);
        assert_eq!(cfg.max_policies, SPD_DEF_MAX_POLICIES);
        assert_eq!(cfg.mask_strategy, MaskStrategyKind::Exact);
    }

    #[test]
    fn policy_req_from_toml() {
        let req: PolicyReq = toml::from_str(
            r#"
            dir = "out"
            action = "protect"
            priority = 10
            local = "10.0.0.0-10.0.0.255"
            remote = "any4"
            sa = 1
            "#,
        )
        .unwrap();
        assert_eq!(req.protocol, Protocol::ANY);
        assert_eq!(req.local.prefix_len(), Some(24));
        assert_eq!(req.sa_id, Some(1));
        assert_eq!(req.validate(), Ok(PolicyType::Ip4Outbound));
    }

    #[test]
    fn ports_from_toml() {
        let parse = |ports: &str| {
            toml::from_str::<PolicyReq>(&format!(
                r#"
                dir = "in"
                action = "bypass"
                priority = 1
                proto = "udp"
                local = "any4"
                remote = "any4"
                {ports}
                "#
            ))
        };

        let req = parse("lport = 500\nrport = \"4500\"").unwrap();
        assert_eq!(req.local_ports, PortRange::exact(500));
        assert_eq!(req.remote_ports, PortRange::exact(4500));

        let req = parse("lport = \"1024-2047\"").unwrap();
        assert_eq!(req.local_ports, PortRange::new(1024, 2047).unwrap());
        assert_eq!(req.remote_ports, PortRange::ANY);

        assert!(parse("lport = 70000").is_err());
        assert!(parse("lport = -1").is_err());
        assert!(parse("lport = \"2047-1024\"").is_err());

        // Serialized back as strings.
        let text = toml::to_string(&parse("lport = 500").unwrap()).unwrap();
        assert!(text.contains("lport = \"500\""), "{text}");
    }
}
