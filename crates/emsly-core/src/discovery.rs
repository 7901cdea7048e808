// ── Discovery service ──
//
// Cached browsing of systems, databases, fields, analytics and assets,
// plus name-to-id resolution on top of those listings. Every read goes
// through an `EntityCache` keyed by all of its identifying parameters;
// the tree is never flattened implicitly, callers descend by group id.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use emsly_api::models::{
    Aircraft, Airport, AnalyticInfo, DatabaseGroup, DatabaseId, EmsSystem, FieldGroup, FieldId,
    FieldInfo, FieldSummary, Fleet, FlightPhase, GroupId, PingStatus, SystemId,
};
use emsly_api::{EmsClient, SharedClock};
use tracing::{debug, warn};

use crate::cache::{EntityCache, Lookup};
use crate::error::CoreError;
use crate::refs::{AnalyticRef, DatabaseRef, FieldRef, ResolvedAnalytic};

/// Names listed when a database name does not resolve.
const AVAILABLE_NAME_SAMPLE: usize = 10;
/// Candidates listed for an ambiguous name.
const AMBIGUOUS_SAMPLE: usize = 5;

// ── Deep search ──────────────────────────────────────────────────────

/// Bounds for [`DiscoveryService::deep_search_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepSearchLimits {
    pub max_depth: usize,
    pub max_results: usize,
    /// Cap on field-group fetches.
    pub max_groups: usize,
}

impl Default for DeepSearchLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_results: 50,
            max_groups: 50,
        }
    }
}

/// A field found by deep search, with the group names leading to it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: FieldSummary,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeepSearchOutcome {
    pub matches: Vec<FieldMatch>,
    pub groups_visited: usize,
    /// Groups whose fetch failed and were skipped.
    pub groups_failed: usize,
    /// A limit stopped the walk before the tree was exhausted.
    pub truncated: bool,
}

// ── Caches ───────────────────────────────────────────────────────────

type SearchKey = (SystemId, DatabaseId, String);

struct DiscoveryCaches {
    systems: EntityCache<(), Vec<EmsSystem>>,
    database_groups: EntityCache<(SystemId, Option<GroupId>), DatabaseGroup>,
    field_groups: EntityCache<(SystemId, DatabaseId, Option<GroupId>), FieldGroup>,
    field_searches: EntityCache<SearchKey, Vec<FieldSummary>>,
    field_info: EntityCache<(SystemId, DatabaseId, FieldId), FieldInfo>,
    analytic_searches: EntityCache<(SystemId, String, Option<GroupId>), Vec<AnalyticInfo>>,
    database_names: EntityCache<SystemId, BTreeMap<String, DatabaseId>>,
    field_names: EntityCache<SearchKey, FieldId>,
    analytic_names: EntityCache<(SystemId, String), ResolvedAnalytic>,
    fleets: EntityCache<SystemId, Vec<Fleet>>,
    aircraft: EntityCache<(SystemId, Option<i64>), Vec<Aircraft>>,
    airports: EntityCache<SystemId, Vec<Airport>>,
    flight_phases: EntityCache<SystemId, Vec<FlightPhase>>,
}

impl DiscoveryCaches {
    fn new(clock: &SharedClock) -> Self {
        Self {
            systems: EntityCache::new(clock.clone()),
            database_groups: EntityCache::new(clock.clone()),
            field_groups: EntityCache::new(clock.clone()),
            field_searches: EntityCache::new(clock.clone()),
            field_info: EntityCache::new(clock.clone()),
            analytic_searches: EntityCache::new(clock.clone()),
            database_names: EntityCache::new(clock.clone()),
            field_names: EntityCache::new(clock.clone()),
            analytic_names: EntityCache::new(clock.clone()),
            fleets: EntityCache::new(clock.clone()),
            aircraft: EntityCache::new(clock.clone()),
            airports: EntityCache::new(clock.clone()),
            flight_phases: EntityCache::new(clock.clone()),
        }
    }

    fn clear(&self) {
        self.systems.clear();
        self.database_groups.clear();
        self.field_groups.clear();
        self.field_searches.clear();
        self.field_info.clear();
        self.analytic_searches.clear();
        self.database_names.clear();
        self.field_names.clear();
        self.analytic_names.clear();
        self.fleets.clear();
        self.aircraft.clear();
        self.airports.clear();
        self.flight_phases.clear();
    }

    fn len(&self) -> usize {
        self.systems.len()
            + self.database_groups.len()
            + self.field_groups.len()
            + self.field_searches.len()
            + self.field_info.len()
            + self.analytic_searches.len()
            + self.database_names.len()
            + self.field_names.len()
            + self.analytic_names.len()
            + self.fleets.len()
            + self.aircraft.len()
            + self.airports.len()
            + self.flight_phases.len()
    }

    fn purge_expired(&self) -> usize {
        self.systems.purge_expired()
            + self.database_groups.purge_expired()
            + self.field_groups.purge_expired()
            + self.field_searches.purge_expired()
            + self.field_info.purge_expired()
            + self.analytic_searches.purge_expired()
            + self.database_names.purge_expired()
            + self.field_names.purge_expired()
            + self.analytic_names.purge_expired()
            + self.fleets.purge_expired()
            + self.aircraft.purge_expired()
            + self.airports.purge_expired()
            + self.flight_phases.purge_expired()
    }
}

// ── Service ──────────────────────────────────────────────────────────

/// Cached discovery over one [`EmsClient`].
///
/// Cloning shares the caches.
#[derive(Clone)]
pub struct DiscoveryService {
    client: EmsClient,
    caches: Arc<DiscoveryCaches>,
    ttl: Duration,
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("client", &self.client)
            .field("ttl", &self.ttl)
            .field("cached_entries", &self.caches.len())
            .finish()
    }
}

impl DiscoveryService {
    pub fn new(client: EmsClient, clock: &SharedClock, ttl: Duration) -> Self {
        Self {
            client,
            caches: Arc::new(DiscoveryCaches::new(clock)),
            ttl,
        }
    }

    /// Same caches, different client handle (e.g. another deadline).
    pub(crate) fn with_client(&self, client: EmsClient) -> Self {
        Self {
            client,
            caches: Arc::clone(&self.caches),
            ttl: self.ttl,
        }
    }

    pub fn client(&self) -> &EmsClient {
        &self.client
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache lookups wait on a concurrent fetch no longer than this
    /// handle's deadline.
    fn lookup(&self) -> Lookup {
        Lookup::new(self.ttl, self.client.deadline())
    }

    /// Drop every cached discovery entry.
    pub fn clear_cache(&self) {
        debug!("clearing discovery caches");
        self.caches.clear();
    }

    /// Total cached entries across every discovery cache.
    pub fn cached_entries(&self) -> usize {
        self.caches.len()
    }

    /// Evict expired entries; for an external sweeper.
    pub fn purge_expired(&self) -> usize {
        self.caches.purge_expired()
    }

    // ── Browsing ─────────────────────────────────────────────────────

    pub async fn list_systems(&self) -> Result<Vec<EmsSystem>, CoreError> {
        self.caches
            .systems
            .get_or_fetch((), self.lookup(), || async {
                self.client.list_systems().await.map_err(CoreError::from)
            })
            .await
    }

    /// One level of the database tree; `None` is the root.
    pub async fn list_databases(
        &self,
        system: SystemId,
        group: Option<&GroupId>,
    ) -> Result<DatabaseGroup, CoreError> {
        self.caches
            .database_groups
            .get_or_fetch((system, group.cloned()), self.lookup(), || async {
                self.client.database_group(system, group).await.map_err(CoreError::from)
            })
            .await
    }

    /// One level of a database's field tree; `None` is the root.
    pub async fn list_fields(
        &self,
        system: SystemId,
        database: &DatabaseId,
        group: Option<&GroupId>,
    ) -> Result<FieldGroup, CoreError> {
        if database.as_str().contains("[entity-type-group]") {
            return Err(CoreError::validation(format!(
                "{database} is a database group id, not a database id; browse it with list_databases"
            )));
        }
        self.caches
            .field_groups
            .get_or_fetch(
                (system, database.clone(), group.cloned()),
                self.lookup(),
                || async {
                    self.client.field_group(system, database, group).await.map_err(CoreError::from)
                },
            )
            .await
    }

    /// Fields whose name matches `text`, at most `max_results` of them.
    ///
    /// Entity-type databases reject the search endpoint, so they are
    /// searched with a bounded walk of the field tree instead.
    pub async fn search_fields(
        &self,
        system: SystemId,
        database: &DatabaseId,
        text: &str,
        max_results: usize,
    ) -> Result<Vec<FieldSummary>, CoreError> {
        let needle = search_text(text)?;
        let mut hits = self
            .caches
            .field_searches
            .get_or_fetch(
                (system, database.clone(), needle.to_lowercase()),
                self.lookup(),
                || self.fetch_field_search(system, database, needle),
            )
            .await?;
        hits.truncate(max_results);
        Ok(hits)
    }

    pub async fn get_field_info(
        &self,
        system: SystemId,
        database: &DatabaseId,
        field: &FieldId,
    ) -> Result<FieldInfo, CoreError> {
        self.caches
            .field_info
            .get_or_fetch(
                (system, database.clone(), field.clone()),
                self.lookup(),
                || async {
                    self.client.field_info(system, database, field).await.map_err(CoreError::from)
                },
            )
            .await
    }

    pub async fn search_analytics(
        &self,
        system: SystemId,
        text: &str,
        group: Option<&GroupId>,
    ) -> Result<Vec<AnalyticInfo>, CoreError> {
        let needle = search_text(text)?;
        self.caches
            .analytic_searches
            .get_or_fetch(
                (system, needle.to_lowercase(), group.cloned()),
                self.lookup(),
                || async {
                    self.client.search_analytics(system, needle, group).await.map_err(CoreError::from)
                },
            )
            .await
    }

    /// Breadth-first walk over field groups matching field names against
    /// `text` (case-insensitive substring).
    ///
    /// Subgroups whose name shares a word with `text` are visited first.
    /// A failing subgroup is skipped and counted; a failing root is an
    /// error.
    pub async fn deep_search_fields(
        &self,
        system: SystemId,
        database: &DatabaseId,
        text: &str,
        limits: DeepSearchLimits,
    ) -> Result<DeepSearchOutcome, CoreError> {
        let needle = search_text(text)?.to_lowercase();
        let words: HashSet<&str> = needle.split_whitespace().collect();

        let mut outcome = DeepSearchOutcome::default();
        let mut queue: VecDeque<(Option<GroupId>, usize, Vec<String>)> =
            VecDeque::from([(None, 0, Vec::new())]);

        while let Some((group, depth, path)) = queue.pop_front() {
            if outcome.matches.len() >= limits.max_results
                || outcome.groups_visited >= limits.max_groups
            {
                outcome.truncated = true;
                break;
            }

            outcome.groups_visited += 1;
            let level = match self.list_fields(system, database, group.as_ref()).await {
                Ok(level) => level,
                Err(err) if group.is_none() => return Err(err),
                Err(err) => {
                    warn!(group = ?group, error = %err, "skipping field group");
                    outcome.groups_failed += 1;
                    continue;
                }
            };

            for field in &level.fields {
                if !field.name.to_lowercase().contains(&needle) {
                    continue;
                }
                if outcome.matches.len() >= limits.max_results {
                    outcome.truncated = true;
                    break;
                }
                outcome.matches.push(FieldMatch {
                    field: field.clone(),
                    path: path.clone(),
                });
            }

            if depth >= limits.max_depth {
                continue;
            }
            for sub in &level.groups {
                let mut sub_path = path.clone();
                sub_path.push(sub.name.clone());
                let entry = (Some(sub.id.clone()), depth + 1, sub_path);
                let relevant = sub
                    .name
                    .to_lowercase()
                    .split_whitespace()
                    .any(|word| words.contains(word));
                if relevant {
                    queue.push_front(entry);
                } else {
                    queue.push_back(entry);
                }
            }
        }

        debug!(
            system,
            database = database.as_str(),
            matches = outcome.matches.len(),
            groups_visited = outcome.groups_visited,
            groups_failed = outcome.groups_failed,
            "deep field search finished"
        );
        Ok(outcome)
    }

    // ── Name resolution ──────────────────────────────────────────────

    /// Resolve a database reference to its id.
    ///
    /// Names are matched case-insensitively against `name`, `pluralName`
    /// and `singularName` of databases at the root and one level below.
    pub async fn resolve_database(
        &self,
        system: SystemId,
        database: &DatabaseRef,
    ) -> Result<DatabaseId, CoreError> {
        let name = match database {
            DatabaseRef::Id(id) => return Ok(id.clone()),
            DatabaseRef::Name(name) => search_text(name)?,
        };

        let names = self
            .caches
            .database_names
            .get_or_fetch(system, self.lookup(), || self.database_name_map(system))
            .await?;

        names.get(&name.to_lowercase()).cloned().ok_or_else(|| {
            let mut available = names
                .keys()
                .take(AVAILABLE_NAME_SAMPLE)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if names.len() > AVAILABLE_NAME_SAMPLE {
                available.push_str(", ...");
            }
            CoreError::validation(format!(
                "database not found: '{name}'; available databases include: {available}"
            ))
        })
    }

    async fn database_name_map(
        &self,
        system: SystemId,
    ) -> Result<BTreeMap<String, DatabaseId>, CoreError> {
        let root = self.list_databases(system, None).await?;
        let mut names = BTreeMap::new();
        index_databases(&mut names, &root);

        for group in &root.groups {
            match self.list_databases(system, Some(&group.id)).await {
                Ok(level) => index_databases(&mut names, &level),
                Err(err) => warn!(group = group.id.as_str(), error = %err, "skipping database group"),
            }
        }
        Ok(names)
    }

    /// Resolve a field reference within `database`.
    ///
    /// An exact (case-insensitive) name match or a single search hit wins;
    /// no hits is `NotFound`, several inexact hits are ambiguous.
    pub async fn resolve_field(
        &self,
        system: SystemId,
        database: &DatabaseId,
        field: &FieldRef,
    ) -> Result<FieldId, CoreError> {
        let name = match field {
            FieldRef::Id(id) => return Ok(id.clone()),
            FieldRef::Name(name) => search_text(name)?,
        };

        self.caches
            .field_names
            .get_or_fetch(
                (system, database.clone(), name.to_lowercase()),
                self.lookup(),
                || self.fetch_field_resolution(system, database, name),
            )
            .await
    }

    /// Resolve an analytic reference to its display name and id.
    pub async fn resolve_analytic(
        &self,
        system: SystemId,
        analytic: &AnalyticRef,
    ) -> Result<ResolvedAnalytic, CoreError> {
        let name = match analytic {
            AnalyticRef::Id(id) => {
                return Ok(ResolvedAnalytic {
                    name: id.as_str().to_owned(),
                    id: id.clone(),
                });
            }
            AnalyticRef::Name(name) => search_text(name)?,
        };

        self.caches
            .analytic_names
            .get_or_fetch((system, name.to_lowercase()), self.lookup(), || {
                self.fetch_analytic_resolution(system, name)
            })
            .await
    }

    async fn fetch_field_search(
        &self,
        system: SystemId,
        database: &DatabaseId,
        text: &str,
    ) -> Result<Vec<FieldSummary>, CoreError> {
        if database.is_entity_type() {
            let outcome = self
                .deep_search_fields(system, database, text, DeepSearchLimits::default())
                .await?;
            return Ok(outcome.matches.into_iter().map(|m| m.field).collect());
        }
        Ok(self.client.search_fields(system, database, text).await?)
    }

    async fn fetch_field_resolution(
        &self,
        system: SystemId,
        database: &DatabaseId,
        name: &str,
    ) -> Result<FieldId, CoreError> {
        let hits = self.search_fields(system, database, name, usize::MAX).await?;
        let hit = pick_match("field", name, &hits, |f| f.name.as_str())?;
        Ok(hit.id.clone())
    }

    async fn fetch_analytic_resolution(
        &self,
        system: SystemId,
        name: &str,
    ) -> Result<ResolvedAnalytic, CoreError> {
        let hits = self.search_analytics(system, name, None).await?;
        let hit = pick_match("analytic", name, &hits, |a| a.name.as_str())?;
        Ok(ResolvedAnalytic {
            name: hit.name.clone(),
            id: hit.id.clone(),
        })
    }

    // ── Assets ───────────────────────────────────────────────────────

    pub async fn list_fleets(&self, system: SystemId) -> Result<Vec<Fleet>, CoreError> {
        self.caches
            .fleets
            .get_or_fetch(system, self.lookup(), || async {
                self.client.list_fleets(system).await.map_err(CoreError::from)
            })
            .await
    }

    /// Aircraft, optionally restricted to one fleet.
    pub async fn list_aircraft(
        &self,
        system: SystemId,
        fleet: Option<i64>,
    ) -> Result<Vec<Aircraft>, CoreError> {
        self.caches
            .aircraft
            .get_or_fetch((system, fleet), self.lookup(), || async {
                self.client.list_aircraft(system, fleet).await.map_err(CoreError::from)
            })
            .await
    }

    pub async fn list_airports(&self, system: SystemId) -> Result<Vec<Airport>, CoreError> {
        self.caches
            .airports
            .get_or_fetch(system, self.lookup(), || async {
                self.client.list_airports(system).await.map_err(CoreError::from)
            })
            .await
    }

    pub async fn list_flight_phases(&self, system: SystemId) -> Result<Vec<FlightPhase>, CoreError> {
        self.caches
            .flight_phases
            .get_or_fetch(system, self.lookup(), || async {
                self.client.list_flight_phases(system).await.map_err(CoreError::from)
            })
            .await
    }

    pub async fn get_fleet(&self, system: SystemId, id: i64) -> Result<Fleet, CoreError> {
        Ok(self.client.get_fleet(system, id).await?)
    }

    pub async fn get_aircraft(&self, system: SystemId, id: i64) -> Result<Aircraft, CoreError> {
        Ok(self.client.get_aircraft(system, id).await?)
    }

    pub async fn get_airport(&self, system: SystemId, id: i64) -> Result<Airport, CoreError> {
        Ok(self.client.get_airport(system, id).await?)
    }

    pub async fn get_flight_phase(&self, system: SystemId, id: i64) -> Result<FlightPhase, CoreError> {
        Ok(self.client.get_flight_phase(system, id).await?)
    }

    /// Reachability check; never cached.
    pub async fn ping(&self, system: SystemId) -> Result<PingStatus, CoreError> {
        Ok(self.client.ping(system).await?)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn search_text(text: &str) -> Result<&str, CoreError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("search text must not be empty"));
    }
    Ok(trimmed)
}

fn index_databases(names: &mut BTreeMap<String, DatabaseId>, level: &DatabaseGroup) {
    for database in &level.databases {
        for name in database.names() {
            names.insert(name.to_lowercase(), database.id.clone());
        }
    }
}

/// Pick the hit named `name`: a unique exact match, else the only hit.
fn pick_match<'a, T>(
    entity: &'static str,
    name: &str,
    hits: &'a [T],
    name_of: impl Fn(&T) -> &str,
) -> Result<&'a T, CoreError> {
    let mut exact = hits.iter().filter(|hit| name_of(*hit).eq_ignore_ascii_case(name));
    match (exact.next(), exact.next(), hits) {
        (Some(hit), None, _) | (None, None, [hit]) => Ok(hit),
        (_, _, []) => Err(CoreError::NotFound {
            entity,
            identifier: name.to_owned(),
        }),
        _ => Err(CoreError::Ambiguous {
            entity,
            name: name.to_owned(),
            candidates: hits
                .iter()
                .take(AMBIGUOUS_SAMPLE)
                .map(|hit| name_of(hit).to_owned())
                .collect(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn summary(name: &str) -> FieldSummary {
        FieldSummary {
            id: FieldId::new(format!("[field][{name}]")),
            name: name.to_owned(),
            field_type: None,
            units: None,
        }
    }

    #[test]
    fn exact_match_wins_over_partial_hits() {
        let hits = [summary("Altitude AGL"), summary("altitude"), summary("Altitude MSL")];
        let hit = pick_match("field", "Altitude", &hits, |f| f.name.as_str()).unwrap();
        assert_eq!(hit.name, "altitude");
    }

    #[test]
    fn single_hit_wins_without_exact_match() {
        let hits = [summary("Pressure Altitude")];
        let hit = pick_match("field", "altitude", &hits, |f| f.name.as_str()).unwrap();
        assert_eq!(hit.name, "Pressure Altitude");
    }

    #[test]
    fn no_hits_is_not_found_and_several_is_ambiguous() {
        let err = pick_match("field", "x", &[] as &[FieldSummary], |f| f.name.as_str()).unwrap_err();
        assert!(err.is_not_found());

        let hits: Vec<FieldSummary> = (0..7).map(|i| summary(&format!("Altitude {i}"))).collect();
        match pick_match("field", "altitude", &hits, |f| f.name.as_str()).unwrap_err() {
            CoreError::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 5),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn blank_search_text_is_rejected() {
        assert!(search_text("   ").is_err());
        assert_eq!(search_text("  tail ").unwrap(), "tail");
    }
}
