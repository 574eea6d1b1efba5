//! Kind-level dependency graph
//!
//! Edges run from a dependency to its dependent. Tiers come from Kahn's
//! algorithm with ties broken by the participating order, so identical input
//! always yields identical tiers.

use crate::descriptor::Catalog;
use crate::error::CatalogError;
use crate::kind::ResourceKind;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::HashSet;

/// Validated acyclic graph over the participating kinds
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraphMap<ResourceKind, ()>,
    order: Vec<ResourceKind>,
}

impl DependencyGraph {
    /// Build the graph for `participating` kinds.
    ///
    /// The catalog is validated first. Dependencies on kinds outside
    /// `participating` are dropped.
    pub fn build(catalog: &Catalog, participating: &[ResourceKind]) -> Result<Self, CatalogError> {
        catalog.validate()?;

        let mut order = Vec::with_capacity(participating.len());
        let mut graph = DiGraphMap::new();
        for &kind in participating {
            catalog.descriptor(kind)?;
            if !graph.contains_node(kind) {
                graph.add_node(kind);
                order.push(kind);
            }
        }

        for &kind in &order {
            let descriptor = catalog.descriptor(kind)?;
            for &dependency in &descriptor.depends_on {
                if graph.contains_node(dependency) {
                    graph.add_edge(dependency, kind, ());
                }
            }
        }

        let built = Self { graph, order };
        if is_cyclic_directed(&built.graph) {
            return Err(CatalogError::Cycle(built.describe_cycle()));
        }
        Ok(built)
    }

    /// Participating kinds in input order
    #[must_use]
    pub fn kinds(&self) -> &[ResourceKind] {
        &self.order
    }

    /// Participating dependencies of `kind`
    #[must_use]
    pub fn dependencies(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(kind, Direction::Incoming)
            .collect();
        deps.sort_by_key(|dep| self.position(*dep));
        deps
    }

    /// Ordered tiers; every dependency of a kind sits in a strictly earlier tier
    #[must_use]
    pub fn tiers(&self) -> Vec<Vec<ResourceKind>> {
        let mut placed: HashSet<ResourceKind> = HashSet::with_capacity(self.order.len());
        let mut tiers = Vec::new();

        while placed.len() < self.order.len() {
            let tier: Vec<ResourceKind> = self
                .order
                .iter()
                .copied()
                .filter(|kind| !placed.contains(kind))
                .filter(|kind| {
                    self.graph
                        .neighbors_directed(*kind, Direction::Incoming)
                        .all(|dep| placed.contains(&dep))
                })
                .collect();
            if tier.is_empty() {
                // unreachable for a graph that passed the cycle check
                break;
            }
            placed.extend(tier.iter().copied());
            tiers.push(tier);
        }
        tiers
    }

    fn position(&self, kind: ResourceKind) -> usize {
        self.order.iter().position(|k| *k == kind).unwrap_or(usize::MAX)
    }

    /// Render one cycle as `A -> B -> A`, following depends-on direction
    fn describe_cycle(&self) -> String {
        let component = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.len() > 1)
            .unwrap_or_default();
        let members: HashSet<ResourceKind> = component.iter().copied().collect();
        let Some(start) = self.order.iter().copied().find(|k| members.contains(k)) else {
            return "unknown cycle".to_string();
        };

        let mut path = vec![start];
        let mut seen = HashSet::from([start]);
        if self.walk_back_to(start, start, &members, &mut path, &mut seen) {
            path.iter().map(ResourceKind::as_str).collect::<Vec<_>>().join(" -> ")
        } else {
            format!("{start} -> {start}")
        }
    }

    fn walk_back_to(
        &self,
        current: ResourceKind,
        start: ResourceKind,
        members: &HashSet<ResourceKind>,
        path: &mut Vec<ResourceKind>,
        seen: &mut HashSet<ResourceKind>,
    ) -> bool {
        for dep in self.dependencies(current) {
            if !members.contains(&dep) {
                continue;
            }
            if dep == start {
                path.push(start);
                return true;
            }
            if seen.insert(dep) {
                path.push(dep);
                if self.walk_back_to(dep, start, members, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}

/// Tiers for `participating` kinds of `catalog`
pub fn tiers(catalog: &Catalog, participating: &[ResourceKind]) -> Result<Vec<Vec<ResourceKind>>, CatalogError> {
    Ok(DependencyGraph::build(catalog, participating)?.tiers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{KindDescriptor, PhaseSelection};
    use pretty_assertions::assert_eq;
    use ResourceKind as K;

    fn tier_of(tiers: &[Vec<ResourceKind>], kind: ResourceKind) -> usize {
        tiers.iter().position(|t| t.contains(&kind)).unwrap()
    }

    #[test]
    fn core_tiers_follow_dependencies() {
        let catalog = Catalog::standard();
        let kinds = catalog.participating(PhaseSelection::core());
        let tiers = tiers(catalog, &kinds).unwrap();

        assert!(tier_of(&tiers, K::ServicePolicy) < tier_of(&tiers, K::WanEdgeTemplate));
        assert!(tier_of(&tiers, K::Site) < tier_of(&tiers, K::SiteSettings));
        assert!(tier_of(&tiers, K::SiteGroup) < tier_of(&tiers, K::SiteGroupMembership));
        assert_eq!(
            tiers[0],
            vec![
                K::SiteGroup,
                K::ServicePolicy,
                K::SwitchTemplate,
                K::RfTemplate,
                K::WlanTemplate,
                K::AlarmTemplate
            ]
        );
        assert_eq!(tiers[1], vec![K::WanEdgeTemplate]);
        for template in [K::SwitchTemplate, K::RfTemplate, K::WlanTemplate, K::WanEdgeTemplate, K::AlarmTemplate] {
            assert!(tier_of(&tiers, template) < tier_of(&tiers, K::Site), "{template} after site");
        }
    }

    #[test]
    fn nac_chain_orders_tags_before_rules_and_portals() {
        let catalog = Catalog::standard();
        let kinds = catalog.participating(PhaseSelection { nac: true, user_macs: true });
        let tiers = tiers(catalog, &kinds).unwrap();
        assert!(tier_of(&tiers, K::SsoRole) < tier_of(&tiers, K::Sso));
        assert!(tier_of(&tiers, K::Sso) < tier_of(&tiers, K::NacPortal));
        assert!(tier_of(&tiers, K::NacTag) < tier_of(&tiers, K::NacRule));
        assert!(tier_of(&tiers, K::NacTag) < tier_of(&tiers, K::UserMac));
    }

    #[test]
    fn non_participating_dependencies_are_ignored() {
        let catalog = Catalog::standard();
        let tiers = tiers(catalog, &[K::WanEdgeTemplate]).unwrap();
        assert_eq!(tiers, vec![vec![K::WanEdgeTemplate]]);
    }

    #[test]
    fn cycle_is_named() {
        let catalog = Catalog::new()
            .with(KindDescriptor::org_collection(K::Sso).depends_on([K::SsoRole]))
            .with(KindDescriptor::org_collection(K::SsoRole).depends_on([K::Sso]));
        let err = tiers(&catalog, &[K::Sso, K::SsoRole]).unwrap_err();
        assert_eq!(err, CatalogError::Cycle("sso -> sso_role -> sso".to_string()));
    }

    #[test]
    fn undescribed_kind_is_rejected() {
        let catalog = Catalog::new().with(KindDescriptor::org_collection(K::Site));
        assert_eq!(
            tiers(&catalog, &[K::Site, K::SiteMap]).unwrap_err(),
            CatalogError::Undescribed(K::SiteMap)
        );
    }
}
