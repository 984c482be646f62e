//! Taxonomy store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide owner-scoped topic/entry CRUD and consistent snapshots.
//! - Own the atomic commit of an approved categorization plan.
//!
//! # Invariants
//! - Active topic names are unique per owner by case-folded key.
//! - Topic deletion is a soft delete; its entries become uncategorized.
//! - Topic create/rename/delete, entry rebinding and plan commits bump the
//!   owner's taxonomy version. Plain entry creation does not.
//! - `commit_plan` runs in one `IMMEDIATE` transaction: it either applies
//!   every topic creation and binding, or nothing.

use crate::db::DbError;
use crate::model::entry::{Entry, EntryId};
use crate::model::topic::{
    is_pseudo_topic_id, is_reserved_topic_name, normalize_topic_name, topic_name_key, OwnerId,
    TaxonomySnapshot, Topic, TopicId, UNCATEGORIZED_TOPIC_ID,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TOPIC_SELECT_SQL: &str = "SELECT
    t.topic_id,
    t.owner_id,
    t.topic_name,
    t.created_at,
    (SELECT COUNT(*)
     FROM entries e
     WHERE e.topic_id = t.topic_id
       AND e.owner_id = t.owner_id) AS entry_count
FROM topics t";

const ENTRY_SELECT_SQL: &str = "SELECT
    entry_id,
    owner_id,
    content,
    topic_id,
    created_at
FROM entries";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for taxonomy persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Topic name is blank after normalization.
    InvalidTopicName(String),
    /// Topic name collides with a pseudo-topic name.
    ReservedTopicName(String),
    /// Another active topic of the same owner already uses this name.
    DuplicateTopicName(String),
    /// Topic id never existed for this owner.
    TopicNotFound(TopicId),
    /// Entry id does not exist for this owner.
    EntryNotFound(EntryId),
    /// Referenced topics or entry links drifted, or the taxonomy version moved on.
    StaleProposal {
        topic_ids: Vec<TopicId>,
        entry_ids: Vec<EntryId>,
        expected_version: u64,
        current_version: u64,
    },
    /// Connection is missing a required table.
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidTopicName(value) => write!(f, "invalid topic name: `{value}`"),
            Self::ReservedTopicName(value) => write!(f, "topic name is reserved: `{value}`"),
            Self::DuplicateTopicName(value) => write!(f, "topic name already exists: `{value}`"),
            Self::TopicNotFound(id) => write!(f, "topic not found: {id}"),
            Self::EntryNotFound(id) => write!(f, "entry not found: {id}"),
            Self::StaleProposal {
                topic_ids,
                entry_ids,
                expected_version,
                current_version,
            } => write!(
                f,
                "stale proposal: topics {topic_ids:?} and entries {entry_ids:?} changed (expected version {expected_version}, current {current_version})"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table: {table}"),
            Self::InvalidData(message) => write!(f, "invalid persisted taxonomy data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Topic constraint for entry listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryTopicFilter {
    #[default]
    Any,
    Uncategorized,
    Topic(TopicId),
}

/// Query options for listing entries. Results are ordered by `entry_id ASC`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub topic: EntryTopicFilter,
    /// Restricts the result to these ids when set.
    pub entry_ids: Option<Vec<EntryId>>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl EntryFilter {
    pub fn uncategorized() -> Self {
        Self {
            topic: EntryTopicFilter::Uncategorized,
            ..Self::default()
        }
    }

    pub fn by_ids(entry_ids: Vec<EntryId>) -> Self {
        Self {
            entry_ids: Some(entry_ids),
            ..Self::default()
        }
    }
}

/// Topic a plan expects to find unchanged at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTopic {
    pub topic_id: TopicId,
    pub topic_name: String,
}

/// Topic to create at commit time, with the entries to bind to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTopic {
    pub name: String,
    pub entry_ids: Vec<EntryId>,
}

/// Desired topic link for one entry (`None` leaves it uncategorized).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryBinding {
    pub entry_id: EntryId,
    pub topic_id: Option<TopicId>,
}

/// Storage-level unit of work derived from an approved proposal set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPlan {
    /// Version the proposal was computed against; `None` skips the check.
    pub expected_version: Option<u64>,
    pub expected_topics: Vec<ExpectedTopic>,
    /// Topic link each entry had when the proposal was computed. Entries
    /// missing here are not checked.
    pub expected_links: BTreeMap<EntryId, Option<TopicId>>,
    pub new_topics: Vec<PlannedTopic>,
    pub bindings: Vec<EntryBinding>,
}

/// Result of [`TaxonomyStore::commit_plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub created_topics: Vec<Topic>,
    pub entries_reassigned: u32,
    /// Entry links already matched the plan; nothing was written.
    pub already_applied: bool,
    /// Taxonomy version after the commit.
    pub version: u64,
}

/// Owner-scoped taxonomy persistence contract.
pub trait TaxonomyStore {
    /// Reads version, active topics and the uncategorized count consistently.
    fn snapshot(&self, owner_id: OwnerId) -> RepoResult<TaxonomySnapshot>;
    fn taxonomy_version(&self, owner_id: OwnerId) -> RepoResult<u64>;
    /// Active topics sorted by id.
    fn list_topics(&self, owner_id: OwnerId) -> RepoResult<Vec<Topic>>;
    fn get_topic(&self, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<Option<Topic>>;
    fn create_topic(&mut self, owner_id: OwnerId, name: &str) -> RepoResult<Topic>;
    fn update_topic(&mut self, owner_id: OwnerId, topic_id: TopicId, name: &str)
        -> RepoResult<Topic>;
    fn delete_topic(&mut self, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<()>;
    fn create_entry(
        &mut self,
        owner_id: OwnerId,
        content: &str,
        topic_id: Option<TopicId>,
    ) -> RepoResult<Entry>;
    fn get_entry(&self, owner_id: OwnerId, entry_id: EntryId) -> RepoResult<Option<Entry>>;
    fn list_entries(&self, owner_id: OwnerId, filter: &EntryFilter) -> RepoResult<Vec<Entry>>;
    /// Rebinds one entry. Returns whether the link changed.
    fn bind_entry_to_topic(
        &mut self,
        owner_id: OwnerId,
        entry_id: EntryId,
        topic_id: Option<TopicId>,
    ) -> RepoResult<bool>;
    /// Entry counts keyed by topic id; uncategorized entries under key `0`.
    fn topic_entry_counts(&self, owner_id: OwnerId) -> RepoResult<BTreeMap<TopicId, u32>>;
    /// Validates and applies a plan as one atomic unit of work.
    fn commit_plan(&mut self, owner_id: OwnerId, plan: &CommitPlan) -> RepoResult<CommitOutcome>;
}

/// SQLite-backed taxonomy store.
pub struct SqliteTaxonomyStore<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteTaxonomyStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl TaxonomyStore for SqliteTaxonomyStore<'_> {
    fn snapshot(&self, owner_id: OwnerId) -> RepoResult<TaxonomySnapshot> {
        let tx = self.conn.unchecked_transaction()?;
        let version = read_version(&tx, owner_id)?;
        let topics = load_active_topics(&tx, owner_id)?;
        let uncategorized: i64 = tx.query_row(
            "SELECT COUNT(*) FROM entries WHERE owner_id = ?1 AND topic_id IS NULL;",
            [owner_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(TaxonomySnapshot {
            owner_id,
            version,
            topics,
            uncategorized_count: count_to_u32(uncategorized)?,
        })
    }

    fn taxonomy_version(&self, owner_id: OwnerId) -> RepoResult<u64> {
        read_version(self.conn, owner_id)
    }

    fn list_topics(&self, owner_id: OwnerId) -> RepoResult<Vec<Topic>> {
        load_active_topics(self.conn, owner_id)
    }

    fn get_topic(&self, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<Option<Topic>> {
        load_topic(self.conn, owner_id, topic_id)
    }

    fn create_topic(&mut self, owner_id: OwnerId, name: &str) -> RepoResult<Topic> {
        let normalized = validate_topic_name(name)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if active_topic_id_by_key(&tx, owner_id, &topic_name_key(&normalized))?.is_some() {
            return Err(RepoError::DuplicateTopicName(normalized));
        }
        let topic = insert_topic(&tx, owner_id, &normalized)?;
        bump_version(&tx, owner_id)?;
        tx.commit()?;
        Ok(topic)
    }

    fn update_topic(
        &mut self,
        owner_id: OwnerId,
        topic_id: TopicId,
        name: &str,
    ) -> RepoResult<Topic> {
        let normalized = validate_topic_name(name)?;
        let key = topic_name_key(&normalized);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let state = load_topic_state(&tx, owner_id, topic_id)?
            .filter(|state| !state.is_deleted)
            .ok_or(RepoError::TopicNotFound(topic_id))?;

        if state.name != normalized {
            if let Some(other) = active_topic_id_by_key(&tx, owner_id, &key)? {
                if other != topic_id {
                    return Err(RepoError::DuplicateTopicName(normalized));
                }
            }
            tx.execute(
                "UPDATE topics
                 SET
                    topic_name = ?3,
                    name_key = ?4,
                    updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
                 WHERE owner_id = ?1
                   AND topic_id = ?2;",
                params![owner_id, topic_id, normalized, key],
            )?;
            bump_version(&tx, owner_id)?;
        }

        let topic = load_topic(&tx, owner_id, topic_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("topic {topic_id} missing after update"))
        })?;
        tx.commit()?;
        Ok(topic)
    }

    fn delete_topic(&mut self, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_topic_state(&tx, owner_id, topic_id)?
            .filter(|state| !state.is_deleted)
            .ok_or(RepoError::TopicNotFound(topic_id))?;

        tx.execute(
            "UPDATE entries
             SET
                topic_id = NULL,
                updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
             WHERE owner_id = ?1
               AND topic_id = ?2;",
            params![owner_id, topic_id],
        )?;
        tx.execute(
            "UPDATE topics
             SET
                is_deleted = 1,
                updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
             WHERE owner_id = ?1
               AND topic_id = ?2;",
            params![owner_id, topic_id],
        )?;
        bump_version(&tx, owner_id)?;
        tx.commit()?;
        Ok(())
    }

    fn create_entry(
        &mut self,
        owner_id: OwnerId,
        content: &str,
        topic_id: Option<TopicId>,
    ) -> RepoResult<Entry> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(topic_id) = topic_id {
            ensure_active_topic(&tx, owner_id, topic_id)?;
        }
        tx.execute(
            "INSERT INTO entries (owner_id, content, topic_id) VALUES (?1, ?2, ?3);",
            params![owner_id, content, topic_id],
        )?;
        let entry_id = tx.last_insert_rowid();
        let entry = load_entry(&tx, owner_id, entry_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("entry {entry_id} missing after insert"))
        })?;
        tx.commit()?;
        Ok(entry)
    }

    fn get_entry(&self, owner_id: OwnerId, entry_id: EntryId) -> RepoResult<Option<Entry>> {
        load_entry(self.conn, owner_id, entry_id)
    }

    fn list_entries(&self, owner_id: OwnerId, filter: &EntryFilter) -> RepoResult<Vec<Entry>> {
        let mut sql = format!("{ENTRY_SELECT_SQL} WHERE owner_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Integer(owner_id)];

        match filter.topic {
            EntryTopicFilter::Any => {}
            EntryTopicFilter::Uncategorized => sql.push_str(" AND topic_id IS NULL"),
            EntryTopicFilter::Topic(topic_id) => {
                sql.push_str(" AND topic_id = ?");
                bind_values.push(Value::Integer(topic_id));
            }
        }

        if let Some(entry_ids) = filter.entry_ids.as_ref() {
            if entry_ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; entry_ids.len()].join(", ");
            sql.push_str(&format!(" AND entry_id IN ({placeholders})"));
            bind_values.extend(entry_ids.iter().map(|id| Value::Integer(*id)));
        }

        sql.push_str(" ORDER BY entry_id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if filter.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(filter.offset)));
            }
        } else if filter.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(filter.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    fn bind_entry_to_topic(
        &mut self,
        owner_id: OwnerId,
        entry_id: EntryId,
        topic_id: Option<TopicId>,
    ) -> RepoResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entry = load_entry(&tx, owner_id, entry_id)?.ok_or(RepoError::EntryNotFound(entry_id))?;
        if let Some(topic_id) = topic_id {
            ensure_active_topic(&tx, owner_id, topic_id)?;
        }
        if entry.topic_id == topic_id {
            return Ok(false);
        }
        write_entry_topic(&tx, owner_id, entry_id, topic_id)?;
        bump_version(&tx, owner_id)?;
        tx.commit()?;
        Ok(true)
    }

    fn topic_entry_counts(&self, owner_id: OwnerId) -> RepoResult<BTreeMap<TopicId, u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(topic_id, ?2) AS bucket, COUNT(*) AS entry_count
             FROM entries
             WHERE owner_id = ?1
             GROUP BY bucket
             ORDER BY bucket ASC;",
        )?;
        let mut rows = stmt.query(params![owner_id, UNCATEGORIZED_TOPIC_ID])?;
        let mut counts = BTreeMap::new();
        counts.insert(UNCATEGORIZED_TOPIC_ID, 0);
        while let Some(row) = rows.next()? {
            let bucket: TopicId = row.get("bucket")?;
            let count: i64 = row.get("entry_count")?;
            counts.insert(bucket, count_to_u32(count)?);
        }
        Ok(counts)
    }

    fn commit_plan(&mut self, owner_id: OwnerId, plan: &CommitPlan) -> RepoResult<CommitOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut current_links = BTreeMap::new();
        let planned_entry_ids = plan
            .bindings
            .iter()
            .map(|binding| binding.entry_id)
            .chain(plan.new_topics.iter().flat_map(|topic| topic.entry_ids.iter().copied()));
        for entry_id in planned_entry_ids {
            let entry =
                load_entry(&tx, owner_id, entry_id)?.ok_or(RepoError::EntryNotFound(entry_id))?;
            current_links.insert(entry_id, entry.topic_id);
        }

        let mut stale = BTreeSet::new();
        for expected in &plan.expected_topics {
            let state = load_topic_state(&tx, owner_id, expected.topic_id)?
                .ok_or(RepoError::TopicNotFound(expected.topic_id))?;
            if state.is_deleted
                || topic_name_key(&state.name) != topic_name_key(&expected.topic_name)
            {
                stale.insert(expected.topic_id);
            }
        }

        let current_version = read_version(&tx, owner_id)?;
        if !stale.is_empty() {
            return Err(RepoError::StaleProposal {
                topic_ids: stale.into_iter().collect(),
                entry_ids: Vec::new(),
                expected_version: plan.expected_version.unwrap_or(current_version),
                current_version,
            });
        }

        if plan_already_applied(&tx, owner_id, plan, &current_links)? {
            return Ok(CommitOutcome {
                created_topics: Vec::new(),
                entries_reassigned: 0,
                already_applied: true,
                version: current_version,
            });
        }

        if let Some(expected_version) = plan.expected_version {
            if expected_version != current_version {
                return Err(RepoError::StaleProposal {
                    topic_ids: Vec::new(),
                    entry_ids: Vec::new(),
                    expected_version,
                    current_version,
                });
            }
        }

        let moved = moved_entries(plan, &current_links);
        if !moved.is_empty() {
            return Err(RepoError::StaleProposal {
                topic_ids: Vec::new(),
                entry_ids: moved,
                expected_version: plan.expected_version.unwrap_or(current_version),
                current_version,
            });
        }

        let mut entries_reassigned = 0u32;
        let mut created_topics = Vec::with_capacity(plan.new_topics.len());
        for planned in &plan.new_topics {
            let normalized = validate_topic_name(&planned.name)?;
            let unique_name = resolve_unique_name(&tx, owner_id, &normalized)?;
            let topic = insert_topic(&tx, owner_id, &unique_name)?;
            for entry_id in &planned.entry_ids {
                write_entry_topic(&tx, owner_id, *entry_id, Some(topic.id))?;
                entries_reassigned += 1;
            }
            created_topics.push(topic);
        }

        for binding in &plan.bindings {
            if current_links.get(&binding.entry_id) == Some(&binding.topic_id) {
                continue;
            }
            if let Some(topic_id) = binding.topic_id {
                ensure_active_topic(&tx, owner_id, topic_id)?;
            }
            write_entry_topic(&tx, owner_id, binding.entry_id, binding.topic_id)?;
            entries_reassigned += 1;
        }

        let version = bump_version(&tx, owner_id)?;
        // Entry counts read before the bindings were written; reload them.
        let mut refreshed = Vec::with_capacity(created_topics.len());
        for topic in &created_topics {
            refreshed.push(load_topic(&tx, owner_id, topic.id)?.ok_or_else(|| {
                RepoError::InvalidData(format!("topic {} missing after commit", topic.id))
            })?);
        }
        tx.commit()?;

        Ok(CommitOutcome {
            created_topics: refreshed,
            entries_reassigned,
            already_applied: false,
            version,
        })
    }
}

#[derive(Debug)]
struct TopicState {
    name: String,
    is_deleted: bool,
}

fn validate_topic_name(name: &str) -> RepoResult<String> {
    let normalized =
        normalize_topic_name(name).ok_or_else(|| RepoError::InvalidTopicName(name.to_string()))?;
    if is_reserved_topic_name(&normalized) {
        return Err(RepoError::ReservedTopicName(normalized));
    }
    Ok(normalized)
}

fn plan_already_applied(
    conn: &Connection,
    owner_id: OwnerId,
    plan: &CommitPlan,
    current_links: &BTreeMap<EntryId, Option<TopicId>>,
) -> RepoResult<bool> {
    for binding in &plan.bindings {
        if current_links.get(&binding.entry_id) != Some(&binding.topic_id) {
            return Ok(false);
        }
    }

    for planned in &plan.new_topics {
        let mut bound_to = BTreeSet::new();
        for entry_id in &planned.entry_ids {
            match current_links.get(entry_id) {
                Some(Some(topic_id)) => {
                    bound_to.insert(*topic_id);
                }
                _ => return Ok(false),
            }
        }
        if bound_to.len() != 1 {
            return Ok(false);
        }
        let Some(topic_id) = bound_to.into_iter().next() else {
            return Ok(false);
        };
        let Some(state) = load_topic_state(conn, owner_id, topic_id)? else {
            return Ok(false);
        };
        if state.is_deleted || !is_name_or_suffixed(&state.name, &planned.name) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Entries whose stored link is neither the one the plan was computed
/// against nor the binding's own target.
fn moved_entries(
    plan: &CommitPlan,
    current_links: &BTreeMap<EntryId, Option<TopicId>>,
) -> Vec<EntryId> {
    let targets: BTreeMap<EntryId, Option<TopicId>> = plan
        .bindings
        .iter()
        .map(|binding| (binding.entry_id, binding.topic_id))
        .collect();
    let mut moved = BTreeSet::new();
    for (entry_id, expected) in &plan.expected_links {
        let Some(current) = current_links.get(entry_id) else {
            continue;
        };
        if current != expected && targets.get(entry_id) != Some(current) {
            moved.insert(*entry_id);
        }
    }
    moved.into_iter().collect()
}

/// Whether `actual` is `base` or the commit path's suffixed form `base (n)`.
fn is_name_or_suffixed(actual: &str, base: &str) -> bool {
    let actual_key = topic_name_key(actual);
    let base_key = topic_name_key(base);
    if actual_key == base_key {
        return true;
    }
    actual_key
        .strip_prefix(base_key.as_str())
        .and_then(|rest| rest.strip_prefix(" ("))
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|digits| digits.parse::<u32>().ok())
        .is_some_and(|n| n >= 2)
}

fn resolve_unique_name(conn: &Connection, owner_id: OwnerId, name: &str) -> RepoResult<String> {
    if active_topic_id_by_key(conn, owner_id, &topic_name_key(name))?.is_none() {
        return Ok(name.to_string());
    }
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{name} ({suffix})");
        if active_topic_id_by_key(conn, owner_id, &topic_name_key(&candidate))?.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

fn insert_topic(conn: &Connection, owner_id: OwnerId, name: &str) -> RepoResult<Topic> {
    conn.execute(
        "INSERT INTO topics (owner_id, topic_name, name_key) VALUES (?1, ?2, ?3);",
        params![owner_id, name, topic_name_key(name)],
    )?;
    let topic_id = conn.last_insert_rowid();
    load_topic(conn, owner_id, topic_id)?
        .ok_or_else(|| RepoError::InvalidData(format!("topic {topic_id} missing after insert")))
}

fn load_topic(conn: &Connection, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<Option<Topic>> {
    let mut stmt = conn.prepare(&format!(
        "{TOPIC_SELECT_SQL}
         WHERE t.owner_id = ?1
           AND t.topic_id = ?2
           AND t.is_deleted = 0;"
    ))?;
    let mut rows = stmt.query(params![owner_id, topic_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_topic_row(row)?));
    }
    Ok(None)
}

fn load_active_topics(conn: &Connection, owner_id: OwnerId) -> RepoResult<Vec<Topic>> {
    let mut stmt = conn.prepare(&format!(
        "{TOPIC_SELECT_SQL}
         WHERE t.owner_id = ?1
           AND t.is_deleted = 0
         ORDER BY t.topic_id ASC;"
    ))?;
    let mut rows = stmt.query([owner_id])?;
    let mut topics = Vec::new();
    while let Some(row) = rows.next()? {
        topics.push(parse_topic_row(row)?);
    }
    Ok(topics)
}

fn load_topic_state(
    conn: &Connection,
    owner_id: OwnerId,
    topic_id: TopicId,
) -> RepoResult<Option<TopicState>> {
    if is_pseudo_topic_id(topic_id) {
        return Ok(None);
    }
    let state = conn
        .query_row(
            "SELECT topic_name, is_deleted
             FROM topics
             WHERE owner_id = ?1
               AND topic_id = ?2;",
            params![owner_id, topic_id],
            |row| {
                Ok(TopicState {
                    name: row.get(0)?,
                    is_deleted: row.get::<_, i64>(1)? != 0,
                })
            },
        )
        .optional()?;
    Ok(state)
}

fn ensure_active_topic(conn: &Connection, owner_id: OwnerId, topic_id: TopicId) -> RepoResult<()> {
    match load_topic_state(conn, owner_id, topic_id)? {
        Some(state) if !state.is_deleted => Ok(()),
        _ => Err(RepoError::TopicNotFound(topic_id)),
    }
}

fn active_topic_id_by_key(
    conn: &Connection,
    owner_id: OwnerId,
    name_key: &str,
) -> RepoResult<Option<TopicId>> {
    let topic_id = conn
        .query_row(
            "SELECT topic_id
             FROM topics
             WHERE owner_id = ?1
               AND name_key = ?2
               AND is_deleted = 0;",
            params![owner_id, name_key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(topic_id)
}

fn load_entry(conn: &Connection, owner_id: OwnerId, entry_id: EntryId) -> RepoResult<Option<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "{ENTRY_SELECT_SQL}
         WHERE owner_id = ?1
           AND entry_id = ?2;"
    ))?;
    let mut rows = stmt.query(params![owner_id, entry_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_entry_row(row)?));
    }
    Ok(None)
}

fn write_entry_topic(
    conn: &Connection,
    owner_id: OwnerId,
    entry_id: EntryId,
    topic_id: Option<TopicId>,
) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE entries
         SET
            topic_id = ?3,
            updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
         WHERE owner_id = ?1
           AND entry_id = ?2;",
        params![owner_id, entry_id, topic_id],
    )?;
    if changed == 0 {
        return Err(RepoError::EntryNotFound(entry_id));
    }
    Ok(())
}

fn read_version(conn: &Connection, owner_id: OwnerId) -> RepoResult<u64> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM taxonomy_versions WHERE owner_id = ?1;",
            [owner_id],
            |row| row.get(0),
        )
        .optional()?;
    let version = version.unwrap_or(0);
    u64::try_from(version)
        .map_err(|_| RepoError::InvalidData(format!("negative taxonomy version `{version}`")))
}

fn bump_version(conn: &Connection, owner_id: OwnerId) -> RepoResult<u64> {
    conn.execute(
        "INSERT INTO taxonomy_versions (owner_id, version)
         VALUES (?1, 1)
         ON CONFLICT(owner_id) DO UPDATE SET version = version + 1;",
        [owner_id],
    )?;
    read_version(conn, owner_id)
}

fn parse_topic_row(row: &Row<'_>) -> RepoResult<Topic> {
    let entry_count: i64 = row.get("entry_count")?;
    Ok(Topic {
        id: row.get("topic_id")?,
        owner_id: row.get("owner_id")?,
        name: row.get("topic_name")?,
        created_at: row.get("created_at")?,
        entry_count: count_to_u32(entry_count)?,
    })
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<Entry> {
    let topic_id: Option<TopicId> = row.get("topic_id")?;
    if let Some(topic_id) = topic_id {
        if topic_id < 1 {
            return Err(RepoError::InvalidData(format!(
                "invalid topic id `{topic_id}` in entries.topic_id"
            )));
        }
    }
    Ok(Entry {
        id: row.get("entry_id")?,
        owner_id: row.get("owner_id")?,
        content: row.get("content")?,
        topic_id,
        created_at: row.get("created_at")?,
    })
}

fn count_to_u32(value: i64) -> RepoResult<u32> {
    u32::try_from(value).map_err(|_| RepoError::InvalidData(format!("invalid count `{value}`")))
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    for table in ["topics", "entries", "taxonomy_versions"] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::is_name_or_suffixed;

    #[test]
    fn suffixed_names_match_their_base() {
        assert!(is_name_or_suffixed("Travel", "travel"));
        assert!(is_name_or_suffixed("Travel (2)", "Travel"));
        assert!(is_name_or_suffixed("travel  (13)", "Travel"));
        assert!(!is_name_or_suffixed("Travel (1)", "Travel"));
        assert!(!is_name_or_suffixed("Travel Plans", "Travel"));
        assert!(!is_name_or_suffixed("Travel (x)", "Travel"));
    }
}
