//! SecurityRuleTranslator
//!
//! Converts between [`GenericSecurityRule`] and the vendor's allow-only
//! permission record, and applies rules to security groups through the
//! dispatcher.
//!
//! Deny rules have no vendor representation. Callers flatten a prioritized
//! rule set with [`skyport_cloud::flatten_to_allow`] first; a deny reaching
//! [`to_vendor`] is rejected as `NotSupported`.

use crate::dispatcher::Dispatcher;
use crate::pagination::{Paged, Paginator};
use crate::params::ParameterMap;
use crate::portrange;
use crate::service::ServiceFamily;
use crate::shape::ItemSet;
use ipnet::IpNet;
use regex::Regex;
use serde::Deserialize;
use skyport_cloud::{
    CloudError, Direction, ErrorKind, GenericSecurityRule, LOWEST_PRECEDENCE, PortSpec, Protocol,
    Result, RuleAction, flatten_to_allow,
};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Characters the vendor accepts in rule descriptions
static SAFE_DESCRIPTION: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9. _\-:/()#,@\[\]+=&;{}!$*]*$"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    pub cidr: IpNet,
    pub description: Option<String>,
}

/// Vendor permission record: allow-only, no priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorPermission {
    /// `tcp`, `udp`, `icmp`, a protocol number, or `-1` for all
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub ranges: Vec<CidrRange>,
    /// Grants to other security groups
    pub peer_groups: Vec<String>,
    pub prefix_lists: Vec<String>,
}

impl VendorPermission {
    fn new(protocol: String, (from_port, to_port): (i32, i32), range: CidrRange) -> Self {
        Self {
            protocol,
            from_port,
            to_port,
            ranges: vec![range],
            peer_groups: Vec::new(),
            prefix_lists: Vec::new(),
        }
    }

    /// Append as `IpPermissions.{index}.*` request parameters
    pub fn encode_into(&self, mut params: ParameterMap, index: usize) -> ParameterMap {
        let prefix = format!("IpPermissions.{}", index);
        params.insert(format!("{}.IpProtocol", prefix), self.protocol.clone());
        params.insert(format!("{}.FromPort", prefix), self.from_port.to_string());
        params.insert(format!("{}.ToPort", prefix), self.to_port.to_string());

        let (mut v4, mut v6) = (0, 0);
        for range in &self.ranges {
            let (key, n) = match range.cidr {
                IpNet::V4(_) => {
                    v4 += 1;
                    (format!("{}.IpRanges.{}", prefix, v4), "CidrIp")
                }
                IpNet::V6(_) => {
                    v6 += 1;
                    (format!("{}.Ipv6Ranges.{}", prefix, v6), "CidrIpv6")
                }
            };
            params.insert(format!("{}.{}", key, n), range.cidr.to_string());
            if let Some(description) = &range.description {
                params.insert(format!("{}.Description", key), description.clone());
            }
        }
        for (i, group) in self.peer_groups.iter().enumerate() {
            params.insert(format!("{}.Groups.{}.GroupId", prefix, i + 1), group.clone());
        }
        for (i, list) in self.prefix_lists.iter().enumerate() {
            params.insert(format!("{}.PrefixListIds.{}.PrefixListId", prefix, i + 1), list.clone());
        }
        params
    }
}

/// Description as sent to the vendor; `None` when it contains characters
/// the vendor would reject
pub fn sanitize_description(description: &str) -> Option<String> {
    if description.is_empty() {
        return None;
    }
    match SAFE_DESCRIPTION.as_ref() {
        Ok(re) if re.is_match(description) => Some(description.to_string()),
        _ => {
            tracing::debug!("Dropping description with unsupported characters: {:?}", description);
            None
        }
    }
}

/// Generic rule to vendor permissions. Discrete port lists expand to one
/// permission per port.
pub fn to_vendor(rule: &GenericSecurityRule) -> Result<Vec<VendorPermission>> {
    if rule.action == RuleAction::Deny {
        return Err(CloudError::NotSupported(format!(
            "deny rule '{}' cannot be expressed as a vendor permission",
            rule
        )));
    }

    let protocol = portrange::vendor_protocol(&rule.protocol).ok_or_else(|| {
        CloudError::NotSupported(format!("protocol '{}' in rule '{}' has no vendor equivalent", rule.protocol, rule))
    })?;
    let range = CidrRange {
        cidr: rule.cidr,
        description: sanitize_description(&rule.description),
    };

    let port_pairs: Vec<(i32, i32)> = match &rule.ports {
        PortSpec::Discrete(ports) if !ports.is_empty() => ports
            .iter()
            .map(|p| (i32::from(*p), i32::from(*p)))
            .collect(),
        PortSpec::Range { start, end } => vec![portrange::encode_range(&protocol, *start, *end)],
        _ => vec![portrange::encode_range(&protocol, -1, -1)],
    };

    Ok(port_pairs
        .into_iter()
        .map(|ports| VendorPermission::new(protocol.clone(), ports, range.clone()))
        .collect())
}

/// Vendor permission to generic rules, one per CIDR entry
pub fn from_vendor(direction: Direction, permission: &VendorPermission) -> Result<Vec<GenericSecurityRule>> {
    if !permission.peer_groups.is_empty() || !permission.prefix_lists.is_empty() {
        return Err(CloudError::NotSupported(format!(
            "permission {} {}-{} grants to security groups {:?} / prefix lists {:?}",
            permission.protocol,
            permission.from_port,
            permission.to_port,
            permission.peer_groups,
            permission.prefix_lists
        )));
    }

    let protocol = Protocol::parse(&permission.protocol);
    if let Protocol::Other(name) = &protocol {
        tracing::warn!("Unrecognized vendor protocol '{}', kept verbatim", name);
    }
    let ports = portrange::decode_range(&permission.protocol, permission.from_port, permission.to_port);

    Ok(permission
        .ranges
        .iter()
        .map(|range| {
            GenericSecurityRule::new(direction, RuleAction::Allow, protocol.clone(), range.cidr)
                .with_priority(LOWEST_PRECEDENCE)
                .with_ports(ports.clone())
                .with_description(range.description.clone().unwrap_or_default())
        })
        .collect())
}

// DescribeSecurityGroups wire shapes

#[derive(Deserialize, Debug, Clone)]
struct IpRangeXml {
    #[serde(rename = "cidrIp")]
    cidr: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct Ipv6RangeXml {
    #[serde(rename = "cidrIpv6")]
    cidr: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct GroupPairXml {
    #[serde(rename = "groupId", default)]
    group_id: String,
}

#[derive(Deserialize, Debug, Clone)]
struct PrefixListXml {
    #[serde(rename = "prefixListId", default)]
    id: String,
}

#[derive(Deserialize, Debug, Clone)]
struct IpPermissionXml {
    #[serde(rename = "ipProtocol")]
    protocol: String,
    #[serde(rename = "fromPort", default)]
    from_port: Option<i32>,
    #[serde(rename = "toPort", default)]
    to_port: Option<i32>,
    #[serde(default)]
    groups: ItemSet<GroupPairXml>,
    #[serde(rename = "ipRanges", default)]
    ip_ranges: ItemSet<IpRangeXml>,
    #[serde(rename = "ipv6Ranges", default)]
    ipv6_ranges: ItemSet<Ipv6RangeXml>,
    #[serde(rename = "prefixListIds", default)]
    prefix_lists: ItemSet<PrefixListXml>,
}

impl IpPermissionXml {
    fn into_permission(self) -> VendorPermission {
        let cidrs = self
            .ip_ranges
            .into_iter()
            .map(|r| (r.cidr, r.description))
            .chain(self.ipv6_ranges.into_iter().map(|r| (r.cidr, r.description)));

        let mut ranges = Vec::new();
        for (cidr, description) in cidrs {
            match cidr.parse::<IpNet>() {
                Ok(net) => ranges.push(CidrRange { cidr: net, description }),
                Err(e) => tracing::warn!("Skipping unparseable CIDR '{}': {}", cidr, e),
            }
        }

        VendorPermission {
            protocol: self.protocol,
            from_port: self.from_port.unwrap_or(-1),
            to_port: self.to_port.unwrap_or(-1),
            ranges,
            peer_groups: self.groups.into_iter().map(|g| g.group_id).collect(),
            prefix_lists: self.prefix_lists.into_iter().map(|p| p.id).collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct SecurityGroupXml {
    #[serde(rename = "groupId")]
    group_id: String,
    #[serde(rename = "ipPermissions", default)]
    ingress: ItemSet<IpPermissionXml>,
    #[serde(rename = "ipPermissionsEgress", default)]
    egress: ItemSet<IpPermissionXml>,
}

#[derive(Deserialize, Debug)]
struct DescribeSecurityGroupsPage {
    #[serde(rename = "securityGroupInfo", default)]
    groups: ItemSet<SecurityGroupXml>,
    #[serde(rename = "nextToken", default)]
    next_token: Option<String>,
}

impl Paged for DescribeSecurityGroupsPage {
    type Item = SecurityGroupXml;

    fn next_cursor(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    fn into_items(self) -> Vec<Self::Item> {
        self.groups.into_vec()
    }
}

#[derive(Deserialize, Debug)]
struct ReturnResponse {
    #[serde(rename = "return", default)]
    ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PermissionKey {
    direction: Direction,
    protocol: String,
    from_port: i32,
    to_port: i32,
    cidr: IpNet,
}

/// Outcome of [`SecurityGroupRules::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub authorized: usize,
    pub revoked: usize,
}

/// Security group rule operations for one region
pub struct SecurityGroupRules<'a> {
    dispatcher: &'a Dispatcher,
    region: String,
}

impl<'a> SecurityGroupRules<'a> {
    pub fn new(dispatcher: &'a Dispatcher, region: impl Into<String>) -> Self {
        Self {
            dispatcher,
            region: region.into(),
        }
    }

    async fn send_permission(
        &self,
        action: &str,
        group_id: &str,
        permission: &VendorPermission,
    ) -> Result<()> {
        let params = permission.encode_into(ParameterMap::new().with("GroupId", group_id), 1);
        let response: ReturnResponse = self
            .dispatcher
            .call(ServiceFamily::Ec2, &self.region, action, params)
            .await?;
        if !response.ok {
            return Err(CloudError::Unknown(format!("{} on {} returned false", action, group_id)));
        }
        Ok(())
    }

    /// Authorize a rule. A permission that already exists counts as success.
    pub async fn authorize(&self, group_id: &str, rule: &GenericSecurityRule) -> Result<()> {
        let action = match rule.direction {
            Direction::Ingress => "AuthorizeSecurityGroupIngress",
            Direction::Egress => "AuthorizeSecurityGroupEgress",
        };
        for permission in to_vendor(rule)? {
            match self.send_permission(action, group_id, &permission).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::DuplicateId
                    && e.message().contains("InvalidPermission.Duplicate") =>
                {
                    tracing::debug!("Permission already present on {}: {}", group_id, rule);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("Authorized {} on {}", rule, group_id);
        Ok(())
    }

    /// Revoke a rule. A permission that is already gone counts as success.
    pub async fn revoke(&self, group_id: &str, rule: &GenericSecurityRule) -> Result<()> {
        let action = match rule.direction {
            Direction::Ingress => "RevokeSecurityGroupIngress",
            Direction::Egress => "RevokeSecurityGroupEgress",
        };
        let allow = GenericSecurityRule {
            action: RuleAction::Allow,
            ..rule.clone()
        };
        for permission in to_vendor(&allow)? {
            match self.send_permission(action, group_id, &permission).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound
                    && e.message().contains("InvalidPermission.NotFound") =>
                {
                    tracing::debug!("Permission already absent on {}: {}", group_id, rule);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("Revoked {} on {}", rule, group_id);
        Ok(())
    }

    async fn permissions(&self, group_id: &str) -> Result<Vec<(Direction, VendorPermission)>> {
        let groups = Paginator::<DescribeSecurityGroupsPage>::new(
            self.dispatcher,
            ServiceFamily::Ec2,
            self.region.clone(),
            "DescribeSecurityGroups",
            ParameterMap::new().with_filter("group-id", [group_id]),
        )
        .collect_all()
        .await?;

        let group = groups
            .into_iter()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| CloudError::NotFound(format!("security group {}", group_id)))?;

        Ok(group
            .ingress
            .into_iter()
            .map(|p| (Direction::Ingress, p.into_permission()))
            .chain(
                group
                    .egress
                    .into_iter()
                    .map(|p| (Direction::Egress, p.into_permission())),
            )
            .collect())
    }

    /// Current rules of a group in generic form. Fails with `NotSupported`
    /// when the group grants to other groups or prefix lists.
    pub async fn describe(&self, group_id: &str) -> Result<Vec<GenericSecurityRule>> {
        let mut rules = Vec::new();
        for (direction, permission) in self.permissions(group_id).await? {
            rules.extend(from_vendor(direction, &permission)?);
        }
        Ok(rules)
    }

    /// Make the group's CIDR permissions match `desired`, which may contain
    /// deny rules and priorities. Group and prefix-list grants are left alone.
    pub async fn sync(&self, group_id: &str, desired: &[GenericSecurityRule]) -> Result<SyncSummary> {
        let mut want: BTreeMap<PermissionKey, GenericSecurityRule> = BTreeMap::new();
        for rule in flatten_to_allow(desired) {
            for permission in to_vendor(&rule)? {
                want.insert(key_of(rule.direction, &permission, rule.cidr), rule.clone());
            }
        }

        let mut have: BTreeMap<PermissionKey, GenericSecurityRule> = BTreeMap::new();
        for (direction, permission) in self.permissions(group_id).await? {
            if !permission.peer_groups.is_empty() || !permission.prefix_lists.is_empty() {
                tracing::warn!(
                    "Leaving group/prefix-list grant on {} untouched: {} {}-{}",
                    group_id,
                    permission.protocol,
                    permission.from_port,
                    permission.to_port
                );
                let cidr_only = VendorPermission {
                    peer_groups: Vec::new(),
                    prefix_lists: Vec::new(),
                    ..permission
                };
                collect_existing(&mut have, direction, &cidr_only)?;
                continue;
            }
            collect_existing(&mut have, direction, &permission)?;
        }

        let mut summary = SyncSummary::default();
        for (key, rule) in &have {
            if !want.contains_key(key) {
                self.revoke(group_id, rule).await?;
                summary.revoked += 1;
            }
        }
        for (key, rule) in &want {
            if !have.contains_key(key) {
                self.authorize(group_id, &single_permission_rule(key, rule)).await?;
                summary.authorized += 1;
            }
        }
        tracing::info!(
            "Synced {}: {} authorized, {} revoked",
            group_id,
            summary.authorized,
            summary.revoked
        );
        Ok(summary)
    }
}

fn key_of(direction: Direction, permission: &VendorPermission, cidr: IpNet) -> PermissionKey {
    PermissionKey {
        direction,
        protocol: permission.protocol.clone(),
        from_port: permission.from_port,
        to_port: permission.to_port,
        cidr,
    }
}

fn collect_existing(
    have: &mut BTreeMap<PermissionKey, GenericSecurityRule>,
    direction: Direction,
    permission: &VendorPermission,
) -> Result<()> {
    let rules = from_vendor(direction, permission)?;
    for (range, rule) in permission.ranges.iter().zip(rules) {
        have.insert(key_of(direction, permission, range.cidr), rule);
    }
    Ok(())
}

/// The rule narrowed to the single vendor permission `key` describes
fn single_permission_rule(key: &PermissionKey, rule: &GenericSecurityRule) -> GenericSecurityRule {
    GenericSecurityRule {
        ports: PortSpec::range(key.from_port, key.to_port),
        ..rule.clone()
    }
}
