//! Resource kinds
//!
//! Every category of configuration object the engine knows how to migrate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of configuration object with a fixed schema and dependency set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SiteGroup,
    ServicePolicy,
    SwitchTemplate,
    RfTemplate,
    WlanTemplate,
    WanEdgeTemplate,
    AlarmTemplate,
    Site,
    SiteSettings,
    SiteWlan,
    SiteMap,
    SiteGroupMembership,
    SsoRole,
    Sso,
    NacTag,
    NacRule,
    NacOrgSettings,
    ScepSettings,
    NacPortal,
    PskPortal,
    UserMac,
    SuperUser,
}

impl ResourceKind {
    /// All kinds, in catalog listing order
    pub const ALL: [ResourceKind; 22] = [
        ResourceKind::SiteGroup,
        ResourceKind::ServicePolicy,
        ResourceKind::SwitchTemplate,
        ResourceKind::RfTemplate,
        ResourceKind::WlanTemplate,
        ResourceKind::WanEdgeTemplate,
        ResourceKind::AlarmTemplate,
        ResourceKind::Site,
        ResourceKind::SiteSettings,
        ResourceKind::SiteWlan,
        ResourceKind::SiteMap,
        ResourceKind::SiteGroupMembership,
        ResourceKind::SsoRole,
        ResourceKind::Sso,
        ResourceKind::NacTag,
        ResourceKind::NacRule,
        ResourceKind::NacOrgSettings,
        ResourceKind::ScepSettings,
        ResourceKind::NacPortal,
        ResourceKind::PskPortal,
        ResourceKind::UserMac,
        ResourceKind::SuperUser,
    ];

    /// Stable snake_case name (also the serialized form)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::SiteGroup => "site_group",
            ResourceKind::ServicePolicy => "service_policy",
            ResourceKind::SwitchTemplate => "switch_template",
            ResourceKind::RfTemplate => "rf_template",
            ResourceKind::WlanTemplate => "wlan_template",
            ResourceKind::WanEdgeTemplate => "wan_edge_template",
            ResourceKind::AlarmTemplate => "alarm_template",
            ResourceKind::Site => "site",
            ResourceKind::SiteSettings => "site_settings",
            ResourceKind::SiteWlan => "site_wlan",
            ResourceKind::SiteMap => "site_map",
            ResourceKind::SiteGroupMembership => "site_group_membership",
            ResourceKind::SsoRole => "sso_role",
            ResourceKind::Sso => "sso",
            ResourceKind::NacTag => "nac_tag",
            ResourceKind::NacRule => "nac_rule",
            ResourceKind::NacOrgSettings => "nac_org_settings",
            ResourceKind::ScepSettings => "scep_settings",
            ResourceKind::NacPortal => "nac_portal",
            ResourceKind::PskPortal => "psk_portal",
            ResourceKind::UserMac => "user_mac",
            ResourceKind::SuperUser => "super_user",
        }
    }

    /// Kinds that can be bound to a site by the assignment resolver
    #[inline]
    #[must_use]
    pub fn is_assignable_template(&self) -> bool {
        matches!(
            self,
            ResourceKind::SwitchTemplate
                | ResourceKind::WanEdgeTemplate
                | ResourceKind::RfTemplate
                | ResourceKind::WlanTemplate
                | ResourceKind::AlarmTemplate
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a kind name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Where instances of a kind live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Owned by the organization
    Org,
    /// Owned by one site; every instance has a parent site
    Site,
}

/// Whether a kind is a list of objects or one settings object per owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Zero or more named objects, created individually
    Collection,
    /// Exactly one settings object, written in place
    Singleton,
}

/// Migration phase a kind belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Always migrated
    Core,
    /// Access assurance objects, opt-in
    Nac,
    /// Endpoint identities, opt-in on top of NAC
    UserMacs,
    /// Administrator invitations, planned from the run selection
    Invites,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ResourceKind::WanEdgeTemplate).unwrap();
        assert_eq!(json, "\"wan_edge_template\"");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "gateway".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown resource kind: 'gateway'");
    }

    #[test]
    fn only_templates_are_assignable() {
        assert!(ResourceKind::AlarmTemplate.is_assignable_template());
        assert!(!ResourceKind::ServicePolicy.is_assignable_template());
        assert!(!ResourceKind::Site.is_assignable_template());
    }
}
