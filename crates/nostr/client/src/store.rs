//! SQLite event store with connection pooling
//!
//! The store uses two connection pools over one WAL database:
//! - Writer pool: a single connection, so every write transaction is serialized
//! - Reader pool: several connections for concurrent queries
//!
//! Events are keyed by id. A row whose `raw_event` is NULL is a stub: an id
//! that some tag referenced before the event itself arrived. Authors, follows
//! and tag-derived references are explicit rows keyed by their natural keys.

use crate::config::DatabaseConfig;
use crate::error::{ClientError, Result};
use nostr::{
    ContactList, DeletionRequest, Event, KIND_CONTACTS, KIND_DELETION, KIND_METADATA,
    KIND_SHORT_TEXT_NOTE, author_references, event_references, is_addressable_kind,
    is_replaceable_kind,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Connection pool wrapper managing writer and reader pools
pub struct ConnectionPool {
    writer: Pool<SqliteConnectionManager>,
    reader: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = || {
            SqliteConnectionManager::file(&config.path).with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            })
        };

        // Single connection: SQLite allows one writer at a time anyway, and
        // this makes every write transaction strictly sequential.
        let writer = Pool::builder().max_size(1).build(manager())?;

        let reader = Pool::builder()
            .max_size(config.max_reader_connections.max(1))
            .build(manager())?;

        Ok(Self { writer, reader })
    }

    /// Get a writer connection
    pub fn writer(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.writer.get()?)
    }

    /// Get a reader connection
    pub fn reader(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.reader.get()?)
    }
}

/// An event row. `event` is `None` while the row is a stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: String,
    pub event: Option<Event>,
    /// Tombstoned by a deletion request from the event's author.
    pub deleted: bool,
    pub expires_at: Option<u64>,
    pub received_at: u64,
}

impl StoredEvent {
    pub fn is_stub(&self) -> bool {
        self.event.is_none()
    }
}

/// Result of [`EventStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First time this id was seen.
    Inserted(StoredEvent),
    /// A stub for this id existed and now holds the full event.
    Hydrated(StoredEvent),
    /// The full event was already stored; nothing but provenance changed.
    Duplicate(StoredEvent),
}

impl SaveOutcome {
    pub fn record(&self) -> &StoredEvent {
        match self {
            SaveOutcome::Inserted(record)
            | SaveOutcome::Hydrated(record)
            | SaveOutcome::Duplicate(record) => record,
        }
    }

    pub fn into_record(self) -> StoredEvent {
        match self {
            SaveOutcome::Inserted(record)
            | SaveOutcome::Hydrated(record)
            | SaveOutcome::Duplicate(record) => record,
        }
    }

    pub fn is_new(&self) -> bool {
        !matches!(self, SaveOutcome::Duplicate(_))
    }
}

/// Profile and bookkeeping for one public key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub pubkey: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub picture: Option<String>,
    pub nip05: Option<String>,
    pub muted: bool,
    pub metadata_updated_at: Option<u64>,
    pub contacts_updated_at: Option<u64>,
    pub mute_list_updated_at: Option<u64>,
}

/// A directed follow edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follow {
    pub source: String,
    pub destination: String,
    pub petname: Option<String>,
    pub relay_hint: Option<String>,
}

/// A locally authored event that some target relay has not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPublish {
    pub event: Event,
    pub relays: Vec<String>,
}

/// Main store interface
pub struct EventStore {
    pool: ConnectionPool,
}

impl EventStore {
    /// Open (or create) the database and its schema
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = ConnectionPool::new(config)?;

        let conn = pool.writer()?;
        Self::init_schema(&conn)?;
        drop(conn);

        info!("Event store initialized at {:?}", config.path);

        Ok(Self { pool })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT,
                created_at INTEGER,
                kind INTEGER,
                d_tag TEXT,
                raw_event TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER,
                received_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_author_kind
                ON events(pubkey, kind, created_at);
            CREATE INDEX IF NOT EXISTS idx_events_expires_at
                ON events(expires_at) WHERE expires_at IS NOT NULL;

            CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                tag_value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_tags_event_id ON event_tags(event_id);
            CREATE INDEX IF NOT EXISTS idx_event_tags_name_value
                ON event_tags(tag_name, tag_value);

            CREATE TABLE IF NOT EXISTS authors (
                pubkey TEXT PRIMARY KEY,
                name TEXT,
                display_name TEXT,
                about TEXT,
                picture TEXT,
                nip05 TEXT,
                muted INTEGER NOT NULL DEFAULT 0,
                metadata_updated_at INTEGER,
                contacts_updated_at INTEGER,
                mute_list_updated_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS follows (
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                petname TEXT,
                relay_hint TEXT,
                PRIMARY KEY (source, destination)
            );
            CREATE INDEX IF NOT EXISTS idx_follows_destination ON follows(destination);

            CREATE TABLE IF NOT EXISTS mute_list (
                owner TEXT NOT NULL,
                pubkey TEXT NOT NULL,
                PRIMARY KEY (owner, pubkey)
            );

            CREATE TABLE IF NOT EXISTS event_references (
                event_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                referenced_id TEXT NOT NULL,
                marker TEXT,
                relay_hint TEXT,
                PRIMARY KEY (event_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_event_references_target
                ON event_references(referenced_id);

            CREATE TABLE IF NOT EXISTS author_references (
                event_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                pubkey TEXT NOT NULL,
                relay_hint TEXT,
                PRIMARY KEY (event_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_author_references_pubkey
                ON author_references(pubkey);

            CREATE TABLE IF NOT EXISTS relays (
                address TEXT PRIMARY KEY,
                first_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS event_relays (
                event_id TEXT NOT NULL,
                relay TEXT NOT NULL,
                PRIMARY KEY (event_id, relay)
            );

            CREATE TABLE IF NOT EXISTS author_relays (
                pubkey TEXT NOT NULL,
                relay TEXT NOT NULL,
                PRIMARY KEY (pubkey, relay)
            );

            CREATE TABLE IF NOT EXISTS deletions (
                target TEXT NOT NULL,
                author TEXT NOT NULL,
                deletion_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (target, author)
            );

            CREATE TABLE IF NOT EXISTS publish_targets (
                event_id TEXT NOT NULL,
                relay TEXT NOT NULL,
                published INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (event_id, relay)
            );",
        )?;

        debug!("Event store schema initialized");
        Ok(())
    }

    /// Run `f` inside a write transaction on the single writer connection.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.writer()?;
        let tx = conn.transaction()?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` on a reader connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.pool.reader()?;
        f(&conn)
    }

    /// Persist a verified event, idempotently by id.
    ///
    /// The caller must have verified the event. A second call with the same id
    /// returns the stored record unchanged.
    pub fn upsert(&self, event: &Event, relay: Option<&str>) -> Result<StoredEvent> {
        self.save(event, relay).map(SaveOutcome::into_record)
    }

    /// Like [`EventStore::upsert`], but reports whether the row is new.
    pub fn save(&self, event: &Event, relay: Option<&str>) -> Result<SaveOutcome> {
        let now = unix_now();
        self.write(|tx| {
            let existing = load_event(tx, &event.id)?;
            if let Some(existing) = existing.as_ref().filter(|e| !e.is_stub()) {
                if let Some(relay) = relay {
                    record_seen(tx, &event.id, relay, now)?;
                }
                return Ok(SaveOutcome::Duplicate(existing.clone()));
            }

            let expires_at = nostr::expiration(event);
            if expires_at.is_some_and(|at| at <= now) {
                return Err(ClientError::ExpiredEvent(event.id.clone()));
            }

            let d_tag = replaceable_identifier(event);
            let deleted = deletion_requested(tx, event, d_tag.as_deref())?;

            tx.execute(
                "INSERT INTO events
                    (id, pubkey, created_at, kind, d_tag, raw_event, deleted, expires_at, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    pubkey = excluded.pubkey,
                    created_at = excluded.created_at,
                    kind = excluded.kind,
                    d_tag = excluded.d_tag,
                    raw_event = excluded.raw_event,
                    deleted = excluded.deleted,
                    expires_at = excluded.expires_at,
                    received_at = excluded.received_at
                 WHERE events.raw_event IS NULL",
                params![
                    &event.id,
                    &event.pubkey,
                    event.created_at,
                    event.kind,
                    d_tag,
                    serde_json::to_string(event)?,
                    deleted,
                    expires_at,
                    now,
                ],
            )?;

            ensure_author(tx, &event.pubkey)?;
            index_tags(tx, event)?;
            link_references(tx, event, now)?;

            match event.kind {
                KIND_METADATA => apply_metadata(tx, event)?,
                KIND_CONTACTS => apply_contact_list(tx, event)?,
                KIND_DELETION => apply_deletion(tx, event)?,
                _ => {}
            }

            if let Some(relay) = relay {
                record_seen(tx, &event.id, relay, now)?;
            }

            let record = load_event(tx, &event.id)?.ok_or_else(|| {
                ClientError::Database(rusqlite::Error::QueryReturnedNoRows)
            })?;

            debug!(event_id = %event.id, kind = event.kind, hydrated = existing.is_some(), "stored event");
            Ok(if existing.is_some() {
                SaveOutcome::Hydrated(record)
            } else {
                SaveOutcome::Inserted(record)
            })
        })
    }

    /// Insert a placeholder for an id that is referenced but not yet known.
    pub fn create_stub(&self, id: &str) -> Result<StoredEvent> {
        let now = unix_now();
        self.write(|tx| {
            insert_stub(tx, id, now)?;
            load_event(tx, id)?
                .ok_or_else(|| ClientError::Database(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_event(&self, id: &str) -> Result<Option<StoredEvent>> {
        self.read(|conn| load_event(conn, id))
    }

    pub fn get_author(&self, pubkey: &str) -> Result<Option<Author>> {
        self.read(|conn| load_author(conn, pubkey))
    }

    /// Number of full (non-stub) event rows, including tombstoned ones.
    pub fn count_events(&self) -> Result<u64> {
        self.read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM events WHERE raw_event IS NOT NULL",
                [],
                |row| row.get(0),
            )?)
        })
    }

    pub fn count_authors(&self) -> Result<u64> {
        self.read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM authors", [], |row| row.get(0))?))
    }

    /// Live events by `pubkey`, newest first.
    pub fn events_by_author(
        &self,
        pubkey: &str,
        kind: Option<u16>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT raw_event FROM events
                 WHERE pubkey = ?1 AND (?2 IS NULL OR kind = ?2)
                   AND deleted = 0 AND raw_event IS NOT NULL
                 ORDER BY created_at DESC, id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![pubkey, kind, limit], |row| row.get::<_, String>(0))?;
            collect_events(rows)
        })
    }

    /// Live events carrying a tag `[name, value, ...]`, newest first.
    pub fn events_by_tag(&self, name: &str, value: &str) -> Result<Vec<Event>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.raw_event, e.created_at, e.id FROM events e
                 JOIN event_tags t ON t.event_id = e.id
                 WHERE t.tag_name = ?1 AND t.tag_value = ?2
                   AND e.deleted = 0 AND e.raw_event IS NOT NULL
                 ORDER BY e.created_at DESC, e.id ASC",
            )?;
            let rows = stmt.query_map(params![name, value], |row| row.get::<_, String>(0))?;
            collect_events(rows)
        })
    }

    /// Live events whose `e` tags point at `id`, oldest first.
    pub fn events_referencing(&self, id: &str) -> Result<Vec<Event>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.raw_event, e.created_at, e.id FROM events e
                 JOIN event_references r ON r.event_id = e.id
                 WHERE r.referenced_id = ?1 AND e.deleted = 0 AND e.raw_event IS NOT NULL
                 ORDER BY e.created_at ASC, e.id ASC",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            collect_events(rows)
        })
    }

    /// Newest live event of `kind` by `pubkey`. Ties go to the lowest id.
    pub fn latest_event(&self, pubkey: &str, kind: u16) -> Result<Option<Event>> {
        self.read(|conn| latest_event(conn, pubkey, kind))
    }

    pub fn follows_of(&self, pubkey: &str) -> Result<Vec<Follow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source, destination, petname, relay_hint FROM follows
                 WHERE source = ?1 ORDER BY destination",
            )?;
            let follows = stmt
                .query_map(params![pubkey], |row| {
                    Ok(Follow {
                        source: row.get(0)?,
                        destination: row.get(1)?,
                        petname: row.get(2)?,
                        relay_hint: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(follows)
        })
    }

    pub fn followers_of(&self, pubkey: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            query_strings(
                conn,
                "SELECT source FROM follows WHERE destination = ?1 ORDER BY source",
                pubkey,
            )
        })
    }

    /// Relays an event has been received from.
    pub fn seen_on(&self, id: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            query_strings(
                conn,
                "SELECT relay FROM event_relays WHERE event_id = ?1 ORDER BY relay",
                id,
            )
        })
    }

    /// Relays associated with an author through hints and contact lists.
    pub fn author_relays(&self, pubkey: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            query_strings(
                conn,
                "SELECT relay FROM author_relays WHERE pubkey = ?1 ORDER BY relay",
                pubkey,
            )
        })
    }

    pub fn known_relays(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT address FROM relays ORDER BY address")?;
            let relays = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(relays)
        })
    }

    /// Stub ids still waiting for their event, oldest first. Ids a deletion
    /// already targets are skipped.
    pub fn stub_ids(&self, limit: usize) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id FROM events e
                 WHERE e.raw_event IS NULL
                   AND NOT EXISTS (SELECT 1 FROM deletions d WHERE d.target = e.id)
                 ORDER BY e.received_at ASC, e.id ASC
                 LIMIT ?1",
            )?;
            let ids = stmt
                .query_map(params![limit], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// Unmuted authors with no metadata applied yet.
    pub fn authors_missing_metadata(&self, limit: usize) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pubkey FROM authors
                 WHERE metadata_updated_at IS NULL AND muted = 0
                 ORDER BY pubkey
                 LIMIT ?1",
            )?;
            let pubkeys = stmt
                .query_map(params![limit], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(pubkeys)
        })
    }

    /// Relay hints other events gave for `id`.
    pub fn reference_hints(&self, id: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            query_strings(
                conn,
                "SELECT DISTINCT relay_hint FROM event_references
                 WHERE referenced_id = ?1 AND relay_hint IS NOT NULL AND relay_hint != ''
                 ORDER BY relay_hint",
                id,
            )
        })
    }

    /// Physically remove events whose expiration is at or before `now`.
    pub fn delete_expired(&self, now: u64) -> Result<usize> {
        let removed = self.write(|tx| {
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM events WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )?;
                stmt.query_map(params![now], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            for id in &ids {
                purge_event(tx, id)?;
            }
            Ok(ids.len())
        })?;
        if removed > 0 {
            info!(removed, "deleted expired events");
        }
        Ok(removed)
    }

    /// Record that `id` should reach each of `relays`.
    pub fn mark_for_publish(&self, id: &str, relays: &[String]) -> Result<()> {
        self.write(|tx| {
            for relay in relays {
                tx.execute(
                    "INSERT OR IGNORE INTO publish_targets (event_id, relay, published)
                     VALUES (?1, ?2, 0)",
                    params![id, relay],
                )?;
            }
            Ok(())
        })
    }

    /// Record a relay's acknowledgement of `id`.
    pub fn mark_published(&self, id: &str, relay: &str) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO publish_targets (event_id, relay, published) VALUES (?1, ?2, 1)
                 ON CONFLICT(event_id, relay) DO UPDATE SET published = 1",
                params![id, relay],
            )?;
            Ok(())
        })
    }

    /// Events created at or after `since` with at least one unacknowledged target.
    pub fn unpublished_events(&self, since: u64) -> Result<Vec<PendingPublish>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.raw_event, p.relay FROM publish_targets p
                 JOIN events e ON e.id = p.event_id
                 WHERE p.published = 0 AND e.raw_event IS NOT NULL AND e.created_at >= ?1
                 ORDER BY e.created_at ASC, e.id ASC, p.relay ASC",
            )?;
            let rows = stmt
                .query_map(params![since], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut pending: Vec<PendingPublish> = Vec::new();
            for (raw, relay) in rows {
                let event: Event = serde_json::from_str(&raw)?;
                match pending.last_mut() {
                    Some(last) if last.event.id == event.id => last.relays.push(relay),
                    _ => pending.push(PendingPublish {
                        event,
                        relays: vec![relay],
                    }),
                }
            }
            Ok(pending)
        })
    }
}

fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for raw in rows {
        events.push(serde_json::from_str(&raw?)?);
    }
    Ok(events)
}

fn query_strings(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params![key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(values)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, bool, Option<u64>, u64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

pub(crate) fn load_event(conn: &Connection, id: &str) -> Result<Option<StoredEvent>> {
    let row = conn
        .query_row(
            "SELECT id, raw_event, deleted, expires_at, received_at FROM events WHERE id = ?1",
            params![id],
            event_from_row,
        )
        .optional()?;

    let Some((id, raw, deleted, expires_at, received_at)) = row else {
        return Ok(None);
    };
    let event = raw.map(|raw| serde_json::from_str(&raw)).transpose()?;
    Ok(Some(StoredEvent {
        id,
        event,
        deleted,
        expires_at,
        received_at,
    }))
}

pub(crate) fn latest_event(conn: &Connection, pubkey: &str, kind: u16) -> Result<Option<Event>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT raw_event FROM events
             WHERE pubkey = ?1 AND kind = ?2 AND deleted = 0 AND raw_event IS NOT NULL
             ORDER BY created_at DESC, id ASC LIMIT 1",
            params![pubkey, kind],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
}

pub(crate) fn load_author(conn: &Connection, pubkey: &str) -> Result<Option<Author>> {
    Ok(conn
        .query_row(
            "SELECT pubkey, name, display_name, about, picture, nip05, muted,
                    metadata_updated_at, contacts_updated_at, mute_list_updated_at
             FROM authors WHERE pubkey = ?1",
            params![pubkey],
            |row| {
                Ok(Author {
                    pubkey: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                    about: row.get(3)?,
                    picture: row.get(4)?,
                    nip05: row.get(5)?,
                    muted: row.get(6)?,
                    metadata_updated_at: row.get(7)?,
                    contacts_updated_at: row.get(8)?,
                    mute_list_updated_at: row.get(9)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn ensure_author(conn: &Connection, pubkey: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO authors (pubkey) VALUES (?1)",
        params![pubkey],
    )?;
    Ok(())
}

fn insert_stub(conn: &Connection, id: &str, now: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO events (id, received_at) VALUES (?1, ?2)",
        params![id, now],
    )?;
    Ok(())
}

fn record_seen(conn: &Connection, id: &str, relay: &str, now: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO relays (address, first_seen) VALUES (?1, ?2)",
        params![relay, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO event_relays (event_id, relay) VALUES (?1, ?2)",
        params![id, relay],
    )?;
    Ok(())
}

fn add_author_relay(conn: &Connection, pubkey: &str, relay: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO author_relays (pubkey, relay) VALUES (?1, ?2)",
        params![pubkey, relay],
    )?;
    Ok(())
}

/// `d` identifier for replaceable and addressable kinds, `None` otherwise.
fn replaceable_identifier(event: &Event) -> Option<String> {
    if is_addressable_kind(event.kind) {
        Some(event.first_tag_value("d").unwrap_or("").to_string())
    } else if is_replaceable_kind(event.kind) {
        Some(String::new())
    } else {
        None
    }
}

/// Whether the author already asked for this event to be deleted.
fn deletion_requested(conn: &Connection, event: &Event, d_tag: Option<&str>) -> Result<bool> {
    let by_id: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM deletions WHERE target = ?1 AND author = ?2)",
        params![&event.id, &event.pubkey],
        |row| row.get(0),
    )?;
    if by_id {
        return Ok(true);
    }

    let Some(d_tag) = d_tag else {
        return Ok(false);
    };
    let coordinate = format!("{}:{}:{}", event.kind, event.pubkey, d_tag);
    let by_coordinate: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM deletions
                       WHERE target = ?1 AND author = ?2 AND created_at >= ?3)",
        params![coordinate, &event.pubkey, event.created_at],
        |row| row.get(0),
    )?;
    Ok(by_coordinate)
}

fn index_tags(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute("DELETE FROM event_tags WHERE event_id = ?1", params![&event.id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO event_tags (event_id, tag_name, tag_value) VALUES (?1, ?2, ?3)",
    )?;
    for tag in &event.tags {
        let name = nostr::tag_value(tag, 0);
        if name.is_empty() {
            continue;
        }
        stmt.execute(params![&event.id, name, nostr::tag_value(tag, 1)])?;
    }
    Ok(())
}

/// Store `e`/`p` references, creating stubs and authors on first sight.
fn link_references(conn: &Connection, event: &Event, now: u64) -> Result<()> {
    // Deletion targets are tracked in `deletions`, never fetched as stubs.
    if event.kind != KIND_DELETION {
        for (position, reference) in event_references(event).into_iter().enumerate() {
            conn.execute(
                "INSERT OR REPLACE INTO event_references
                    (event_id, position, referenced_id, marker, relay_hint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &event.id,
                    position,
                    &reference.event_id,
                    reference.marker.map(|m| m.as_str()),
                    &reference.relay_url,
                ],
            )?;
            insert_stub(conn, &reference.event_id, now)?;
        }
    }

    for (position, reference) in author_references(event).into_iter().enumerate() {
        conn.execute(
            "INSERT OR REPLACE INTO author_references (event_id, position, pubkey, relay_hint)
             VALUES (?1, ?2, ?3, ?4)",
            params![&event.id, position, &reference.pubkey, &reference.relay_url],
        )?;
        ensure_author(conn, &reference.pubkey)?;
        if let Some(relay) = &reference.relay_url {
            add_author_relay(conn, &reference.pubkey, relay)?;
        }
    }
    Ok(())
}

fn apply_metadata(conn: &Connection, event: &Event) -> Result<()> {
    let applied: Option<u64> = conn.query_row(
        "SELECT metadata_updated_at FROM authors WHERE pubkey = ?1",
        params![&event.pubkey],
        |row| row.get(0),
    )?;
    if applied.is_some_and(|at| at >= event.created_at) {
        debug!(event_id = %event.id, "ignoring stale metadata");
        return Ok(());
    }

    let content: Value = match serde_json::from_str(&event.content) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            warn!(event_id = %event.id, "metadata content is not a JSON object");
            return Ok(());
        }
    };
    let field = |name: &str| content.get(name).and_then(Value::as_str).map(str::to_string);

    conn.execute(
        "UPDATE authors SET name = ?2, display_name = ?3, about = ?4, picture = ?5,
                nip05 = ?6, metadata_updated_at = ?7
         WHERE pubkey = ?1",
        params![
            &event.pubkey,
            field("name"),
            field("display_name"),
            field("about"),
            field("picture"),
            field("nip05"),
            event.created_at,
        ],
    )?;
    Ok(())
}

fn apply_contact_list(conn: &Connection, event: &Event) -> Result<()> {
    let applied: Option<u64> = conn.query_row(
        "SELECT contacts_updated_at FROM authors WHERE pubkey = ?1",
        params![&event.pubkey],
        |row| row.get(0),
    )?;
    if applied.is_some_and(|at| at >= event.created_at) {
        debug!(event_id = %event.id, "ignoring stale contact list");
        return Ok(());
    }

    let list = match ContactList::from_event(event) {
        Ok(list) => list,
        Err(e) => {
            warn!(event_id = %event.id, "unusable contact list: {}", e);
            return Ok(());
        }
    };

    conn.execute("DELETE FROM follows WHERE source = ?1", params![&list.owner])?;
    for contact in &list.contacts {
        ensure_author(conn, &contact.pubkey)?;
        conn.execute(
            "INSERT INTO follows (source, destination, petname, relay_hint)
             VALUES (?1, ?2, ?3, ?4)",
            params![&list.owner, &contact.pubkey, &contact.petname, &contact.relay_url],
        )?;
        if let Some(relay) = &contact.relay_url {
            add_author_relay(conn, &contact.pubkey, relay)?;
        }
    }
    for relay in &list.relays {
        add_author_relay(conn, &list.owner, relay)?;
    }

    conn.execute(
        "UPDATE authors SET contacts_updated_at = ?2 WHERE pubkey = ?1",
        params![&list.owner, event.created_at],
    )?;
    debug!(owner = %list.owner, follows = list.len(), "applied contact list");
    Ok(())
}

fn apply_deletion(conn: &Connection, event: &Event) -> Result<()> {
    let request = match DeletionRequest::from_event(event) {
        Ok(request) => request,
        Err(e) => {
            warn!(event_id = %event.id, "unusable deletion request: {}", e);
            return Ok(());
        }
    };

    let remember = |target: &str| {
        conn.execute(
            "INSERT INTO deletions (target, author, deletion_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target, author) DO UPDATE SET
                deletion_id = excluded.deletion_id,
                created_at = excluded.created_at
             WHERE excluded.created_at > deletions.created_at",
            params![target, &request.author, &event.id, request.created_at],
        )
    };

    let mut tombstoned = 0;
    for id in &request.event_ids {
        remember(id)?;
        tombstoned += conn.execute(
            "UPDATE events SET deleted = 1 WHERE id = ?1 AND pubkey = ?2",
            params![id, &request.author],
        )?;
    }
    for coordinate in &request.coordinates {
        remember(&coordinate.to_string())?;
        tombstoned += conn.execute(
            "UPDATE events SET deleted = 1
             WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3 AND created_at <= ?4",
            params![
                &coordinate.pubkey,
                coordinate.kind,
                &coordinate.identifier,
                request.created_at
            ],
        )?;
    }

    debug!(event_id = %event.id, tombstoned, "applied deletion request");
    Ok(())
}

/// Remove an event row and everything derived from it.
pub(crate) fn purge_event(conn: &Connection, id: &str) -> Result<()> {
    for sql in [
        "DELETE FROM event_tags WHERE event_id = ?1",
        "DELETE FROM event_references WHERE event_id = ?1",
        "DELETE FROM author_references WHERE event_id = ?1",
        "DELETE FROM event_relays WHERE event_id = ?1",
        "DELETE FROM publish_targets WHERE event_id = ?1",
        "DELETE FROM events WHERE id = ?1",
    ] {
        conn.execute(sql, params![id])?;
    }
    Ok(())
}

/// Physically delete every text note by `pubkey`. Returns the count removed.
pub(crate) fn purge_posts_by(conn: &Connection, pubkey: &str) -> Result<usize> {
    let ids = {
        let mut stmt = conn.prepare(
            "SELECT id FROM events WHERE pubkey = ?1 AND kind = ?2 AND raw_event IS NOT NULL",
        )?;
        stmt.query_map(params![pubkey, KIND_SHORT_TEXT_NOTE], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };
    for id in &ids {
        purge_event(conn, id)?;
    }
    Ok(ids.len())
}
