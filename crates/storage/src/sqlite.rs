use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use dealsync_core::{
    Actor, ChangeKind, ChangeSignal, Deal, DealId, DealPatch, DealStage, DealStatus,
    HistoryEntryId, Lender, LenderId, LenderPatch, LenderStage, LenderSubstage,
    NotesHistoryEntry, Table, Timestamp, TrackingStatus, ActorId,
};

use crate::error::StorageError;
use crate::traits::{ChangeFeed, RemoteStore};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn opt_timestamp(raw: Option<i64>) -> Result<Option<Timestamp>, StorageError> {
    Ok(raw.map(Timestamp::from_i64).transpose()?)
}

fn opt_timestamp_value(ts: Option<Timestamp>) -> Value {
    ts.map_or(Value::Null, |t| Value::Integer(t.as_i64()))
}

fn map_constraint(err: rusqlite::Error, what: String) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(what)
        }
        other => StorageError::Sqlite(other),
    }
}

const DEAL_COLUMNS: &str = "id, name, value, status, stage, is_priority, is_archived, notes, notes_updated_at, created_by, created_at, updated_at";
const LENDER_COLUMNS: &str = "id, deal_id, name, stage, substage, tracking_status, notes, notes_updated_at, created_at, updated_at";

fn read_deal(row: &rusqlite::Row) -> Result<Deal, StorageError> {
    Ok(Deal {
        id: DealId::from_bytes(to_array::<16>(row.get(0)?, "deal id")?),
        name: row.get(1)?,
        value: row.get(2)?,
        status: DealStatus::parse(&row.get::<_, String>(3)?)?,
        stage: DealStage::parse(&row.get::<_, String>(4)?)?,
        is_priority: row.get(5)?,
        is_archived: row.get(6)?,
        notes: row.get(7)?,
        notes_updated_at: opt_timestamp(row.get(8)?)?,
        created_by: ActorId::from_bytes(to_array::<16>(row.get(9)?, "created_by")?),
        created_at: Timestamp::from_i64(row.get(10)?)?,
        updated_at: Timestamp::from_i64(row.get(11)?)?,
        lenders: Vec::new(),
    })
}

fn read_lender(row: &rusqlite::Row) -> Result<Lender, StorageError> {
    let substage = row
        .get::<_, Option<String>>(4)?
        .map(|s| LenderSubstage::parse(&s))
        .transpose()?;
    Ok(Lender {
        id: LenderId::from_bytes(to_array::<16>(row.get(0)?, "lender id")?),
        deal_id: DealId::from_bytes(to_array::<16>(row.get(1)?, "lender deal_id")?),
        name: row.get(2)?,
        stage: LenderStage::parse(&row.get::<_, String>(3)?)?,
        substage,
        tracking_status: TrackingStatus::parse(&row.get::<_, String>(5)?)?,
        notes: row.get(6)?,
        notes_updated_at: opt_timestamp(row.get(7)?)?,
        notes_history: Vec::new(),
        created_at: Timestamp::from_i64(row.get(8)?)?,
        updated_at: Timestamp::from_i64(row.get(9)?)?,
    })
}

fn deal_assignments(deal: &Deal, patch: &DealPatch) -> Vec<(&'static str, Value)> {
    let mut sets = Vec::new();
    if patch.name.is_some() {
        sets.push(("name", Value::Text(deal.name.clone())));
    }
    if patch.value.is_some() {
        sets.push(("value", Value::Integer(deal.value)));
    }
    if patch.status.is_some() {
        sets.push(("status", Value::Text(deal.status.as_str().to_string())));
    }
    if patch.stage.is_some() {
        sets.push(("stage", Value::Text(deal.stage.as_str().to_string())));
    }
    if patch.is_priority.is_some() {
        sets.push(("is_priority", Value::Integer(deal.is_priority as i64)));
    }
    if patch.is_archived.is_some() {
        sets.push(("is_archived", Value::Integer(deal.is_archived as i64)));
    }
    if patch.notes.is_some() {
        sets.push(("notes", Value::Text(deal.notes.clone())));
        sets.push(("notes_updated_at", opt_timestamp_value(deal.notes_updated_at)));
    }
    sets.push(("updated_at", Value::Integer(deal.updated_at.as_i64())));
    sets
}

fn lender_assignments(lender: &Lender, patch: &LenderPatch) -> Vec<(&'static str, Value)> {
    let mut sets = Vec::new();
    if patch.name.is_some() {
        sets.push(("name", Value::Text(lender.name.clone())));
    }
    if patch.stage.is_some() {
        sets.push(("stage", Value::Text(lender.stage.as_str().to_string())));
    }
    if patch.substage.is_some() {
        let substage = lender
            .substage
            .map_or(Value::Null, |s| Value::Text(s.as_str().to_string()));
        sets.push(("substage", substage));
    }
    if patch.tracking_status.is_some() {
        sets.push(("tracking_status", Value::Text(lender.tracking_status.as_str().to_string())));
    }
    if patch.notes.is_some() {
        sets.push(("notes", Value::Text(lender.notes.clone())));
        sets.push(("notes_updated_at", opt_timestamp_value(lender.notes_updated_at)));
    }
    sets.push(("updated_at", Value::Integer(lender.updated_at.as_i64())));
    sets
}

/// `UPDATE ... WHERE id = ? AND <policy>`; the policy flag makes a denied
/// update touch zero rows instead of failing.
fn execute_update(
    conn: &Connection,
    table: Table,
    sets: Vec<(&'static str, Value)>,
    id: &[u8; 16],
    allowed: bool,
) -> Result<u64, StorageError> {
    let n = sets.len();
    let assignments = sets
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{col} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {assignments} WHERE id = ?{} AND ?{} = 1",
        table.as_str(),
        n + 1,
        n + 2
    );
    let mut values: Vec<Value> = sets.into_iter().map(|(_, v)| v).collect();
    values.push(Value::Blob(id.to_vec()));
    values.push(Value::Integer(allowed as i64));
    let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
    Ok(changed as u64)
}

struct Shared {
    conn: Mutex<Connection>,
    feed: Arc<dyn ChangeFeed>,
}

/// SQLite-backed stand-in for the remote persistence service.
///
/// Shared by any number of [`RemoteSession`]s. Each successful row change is
/// announced on the change feed, the way a hosted database's realtime channel
/// would.
#[derive(Clone)]
pub struct SqliteRemote {
    shared: Arc<Shared>,
}

impl SqliteRemote {
    pub fn open(path: &str, feed: Arc<dyn ChangeFeed>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self::from_conn(conn, feed))
    }

    pub fn open_in_memory(feed: Arc<dyn ChangeFeed>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self::from_conn(conn, feed))
    }

    fn from_conn(conn: Connection, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                feed,
            }),
        }
    }

    pub fn feed(&self) -> Arc<dyn ChangeFeed> {
        self.shared.feed.clone()
    }

    /// A connection authenticated as `actor`.
    pub fn session(&self, actor: Actor) -> RemoteSession {
        RemoteSession {
            remote: self.clone(),
            actor,
        }
    }

    fn publish(&self, table: Table, kind: ChangeKind) {
        self.shared.feed.publish(ChangeSignal::new(table, kind));
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn load_all(&self) -> Result<Vec<Deal>, StorageError> {
        let conn = self.shared.conn.lock();
        let mut deals: Vec<Deal> = Vec::new();
        let mut deal_index: HashMap<DealId, usize> = HashMap::new();
        let mut lender_index: HashMap<LenderId, (usize, usize)> = HashMap::new();

        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals ORDER BY created_at, rowid"
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let deal = read_deal(row)?;
            deal_index.insert(deal.id, deals.len());
            deals.push(deal);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {LENDER_COLUMNS} FROM deal_lenders ORDER BY created_at, rowid"
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let lender = read_lender(row)?;
            let Some(&di) = deal_index.get(&lender.deal_id) else {
                tracing::warn!(lender_id = %lender.id, deal_id = %lender.deal_id, "lender row without deal");
                continue;
            };
            lender_index.insert(lender.id, (di, deals[di].lenders.len()));
            deals[di].lenders.push(lender);
        }

        let mut stmt = conn.prepare(
            "SELECT id, lender_id, text, updated_at FROM lender_notes_history ORDER BY updated_at DESC, rowid DESC",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let lender_id = LenderId::from_bytes(to_array::<16>(row.get(1)?, "history lender_id")?);
            let Some(&(di, li)) = lender_index.get(&lender_id) else {
                continue;
            };
            deals[di].lenders[li].notes_history.push(NotesHistoryEntry {
                id: HistoryEntryId::from_bytes(to_array::<16>(row.get(0)?, "history id")?),
                text: row.get(2)?,
                updated_at: Timestamp::from_i64(row.get(3)?)?,
            });
        }

        Ok(deals)
    }

    pub fn deal_exists(&self, deal_id: DealId) -> Result<bool, StorageError> {
        let conn = self.shared.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM deals WHERE id = ?1",
                rusqlite::params![deal_id.as_bytes().as_slice()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ========================================================================
    // Writes (row-level policy applied per actor)
    // ========================================================================

    fn insert_deal_as(&self, actor: &Actor, deal: &Deal) -> Result<(), StorageError> {
        if !actor.can_write() {
            return Err(StorageError::PermissionDenied(format!("{} cannot create deals", actor.name)));
        }
        {
            let conn = self.shared.conn.lock();
            conn.execute(
                &format!("INSERT INTO deals ({DEAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
                rusqlite::params![
                    deal.id.as_bytes().as_slice(),
                    deal.name,
                    deal.value,
                    deal.status.as_str(),
                    deal.stage.as_str(),
                    deal.is_priority,
                    deal.is_archived,
                    deal.notes,
                    deal.notes_updated_at.map(|t| t.as_i64()),
                    deal.created_by.as_bytes().as_slice(),
                    deal.created_at.as_i64(),
                    deal.updated_at.as_i64(),
                ],
            )
            .map_err(|e| map_constraint(e, format!("deal {} already exists", deal.id)))?;
        }
        self.publish(Table::Deals, ChangeKind::Insert);
        Ok(())
    }

    fn update_deal_as(&self, actor: &Actor, deal: &Deal, patch: &DealPatch) -> Result<u64, StorageError> {
        let changed = {
            let conn = self.shared.conn.lock();
            execute_update(
                &conn,
                Table::Deals,
                deal_assignments(deal, patch),
                deal.id.as_bytes(),
                actor.can_write(),
            )?
        };
        if changed > 0 {
            self.publish(Table::Deals, ChangeKind::Update);
        }
        Ok(changed)
    }

    /// Only admins and the deal's creator may delete; anyone else gets a
    /// silent zero-row result.
    fn delete_deal_as(&self, actor: &Actor, deal_id: DealId) -> Result<u64, StorageError> {
        let (changed, cascaded) = {
            let conn = self.shared.conn.lock();
            let cascaded: i64 = conn.query_row(
                "SELECT COUNT(*) FROM deal_lenders WHERE deal_id = ?1",
                rusqlite::params![deal_id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            let changed = conn.execute(
                "DELETE FROM deals WHERE id = ?1 AND (?2 = 1 OR created_by = ?3)",
                rusqlite::params![
                    deal_id.as_bytes().as_slice(),
                    actor.is_admin(),
                    actor.id.as_bytes().as_slice(),
                ],
            )?;
            (changed as u64, cascaded)
        };
        if changed > 0 {
            self.publish(Table::Deals, ChangeKind::Delete);
            if cascaded > 0 {
                self.publish(Table::DealLenders, ChangeKind::Delete);
            }
        }
        Ok(changed)
    }

    fn insert_lender_as(&self, actor: &Actor, lender: &Lender) -> Result<(), StorageError> {
        if !actor.can_write() {
            return Err(StorageError::PermissionDenied(format!("{} cannot add lenders", actor.name)));
        }
        {
            let conn = self.shared.conn.lock();
            conn.execute(
                &format!("INSERT INTO deal_lenders ({LENDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                rusqlite::params![
                    lender.id.as_bytes().as_slice(),
                    lender.deal_id.as_bytes().as_slice(),
                    lender.name,
                    lender.stage.as_str(),
                    lender.substage.map(|s| s.as_str()),
                    lender.tracking_status.as_str(),
                    lender.notes,
                    lender.notes_updated_at.map(|t| t.as_i64()),
                    lender.created_at.as_i64(),
                    lender.updated_at.as_i64(),
                ],
            )
            .map_err(|e| map_constraint(e, format!("lender {} rejected for deal {}", lender.id, lender.deal_id)))?;
        }
        self.publish(Table::DealLenders, ChangeKind::Insert);
        Ok(())
    }

    fn update_lender_as(&self, actor: &Actor, lender: &Lender, patch: &LenderPatch) -> Result<u64, StorageError> {
        let changed = {
            let conn = self.shared.conn.lock();
            execute_update(
                &conn,
                Table::DealLenders,
                lender_assignments(lender, patch),
                lender.id.as_bytes(),
                actor.can_write(),
            )?
        };
        if changed > 0 {
            self.publish(Table::DealLenders, ChangeKind::Update);
        }
        Ok(changed)
    }

    fn delete_lender_as(&self, actor: &Actor, lender_id: LenderId) -> Result<u64, StorageError> {
        if !actor.can_write() {
            return Err(StorageError::PermissionDenied(format!("{} cannot remove lenders", actor.name)));
        }
        let changed = {
            let conn = self.shared.conn.lock();
            conn.execute(
                "DELETE FROM deal_lenders WHERE id = ?1",
                rusqlite::params![lender_id.as_bytes().as_slice()],
            )? as u64
        };
        if changed > 0 {
            self.publish(Table::DealLenders, ChangeKind::Delete);
        }
        Ok(changed)
    }

    fn insert_history_as(
        &self,
        actor: &Actor,
        lender_id: LenderId,
        entry: &NotesHistoryEntry,
    ) -> Result<(), StorageError> {
        if !actor.can_write() {
            return Err(StorageError::PermissionDenied(format!("{} cannot write notes history", actor.name)));
        }
        {
            let conn = self.shared.conn.lock();
            conn.execute(
                "INSERT INTO lender_notes_history (id, lender_id, text, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    entry.id.as_bytes().as_slice(),
                    lender_id.as_bytes().as_slice(),
                    entry.text,
                    entry.updated_at.as_i64(),
                ],
            )
            .map_err(|e| map_constraint(e, format!("history entry for lender {lender_id}")))?;
        }
        self.publish(Table::LenderNotesHistory, ChangeKind::Insert);
        Ok(())
    }

    fn delete_history_as(&self, actor: &Actor, entry_id: HistoryEntryId) -> Result<u64, StorageError> {
        if !actor.can_write() {
            return Err(StorageError::PermissionDenied(format!("{} cannot delete notes history", actor.name)));
        }
        let changed = {
            let conn = self.shared.conn.lock();
            conn.execute(
                "DELETE FROM lender_notes_history WHERE id = ?1",
                rusqlite::params![entry_id.as_bytes().as_slice()],
            )? as u64
        };
        if changed > 0 {
            self.publish(Table::LenderNotesHistory, ChangeKind::Delete);
        }
        Ok(changed)
    }
}

/// [`RemoteStore`] handle bound to one actor.
#[derive(Clone)]
pub struct RemoteSession {
    remote: SqliteRemote,
    actor: Actor,
}

impl RemoteSession {
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn remote(&self) -> &SqliteRemote {
        &self.remote
    }
}

#[async_trait]
impl RemoteStore for RemoteSession {
    async fn fetch_all(&self) -> Result<Vec<Deal>, StorageError> {
        self.remote.load_all()
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<(), StorageError> {
        self.remote.insert_deal_as(&self.actor, deal)
    }

    async fn update_deal(&self, deal: &Deal, patch: &DealPatch) -> Result<u64, StorageError> {
        self.remote.update_deal_as(&self.actor, deal, patch)
    }

    async fn delete_deal(&self, deal_id: DealId) -> Result<u64, StorageError> {
        self.remote.delete_deal_as(&self.actor, deal_id)
    }

    async fn deal_exists(&self, deal_id: DealId) -> Result<bool, StorageError> {
        self.remote.deal_exists(deal_id)
    }

    async fn insert_lender(&self, lender: &Lender) -> Result<(), StorageError> {
        self.remote.insert_lender_as(&self.actor, lender)
    }

    async fn update_lender(&self, lender: &Lender, patch: &LenderPatch) -> Result<u64, StorageError> {
        self.remote.update_lender_as(&self.actor, lender, patch)
    }

    async fn delete_lender(&self, lender_id: LenderId) -> Result<u64, StorageError> {
        self.remote.delete_lender_as(&self.actor, lender_id)
    }

    async fn insert_history_entry(
        &self,
        lender_id: LenderId,
        entry: &NotesHistoryEntry,
    ) -> Result<(), StorageError> {
        self.remote.insert_history_as(&self.actor, lender_id, entry)
    }

    async fn delete_history_entry(&self, entry_id: HistoryEntryId) -> Result<u64, StorageError> {
        self.remote.delete_history_as(&self.actor, entry_id)
    }
}
