//! Follow and mute projections over the event store.
//!
//! Reads use reader connections. Mutations (mute, unmute, applying a
//! received mute list) each run as one write transaction, so the flag, the
//! post purge and the list change land together or not at all.

use crate::error::{ClientError, Result};
use crate::store::{EventStore, ensure_author, purge_posts_by};
use nostr::MuteList;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SocialGraph {
    store: Arc<EventStore>,
}

impl SocialGraph {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// Accounts `pubkey` follows.
    pub fn one_hop(&self, pubkey: &str) -> Result<BTreeSet<String>> {
        self.store.read(|conn| one_hop(conn, pubkey))
    }

    /// `pubkey`, the accounts it follows, and the accounts those follow.
    pub fn in_network(&self, pubkey: &str) -> Result<BTreeSet<String>> {
        self.store.read(|conn| in_network(conn, pubkey))
    }

    /// Known, unmuted authors outside [`SocialGraph::in_network`].
    pub fn out_of_network(&self, pubkey: &str) -> Result<BTreeSet<String>> {
        self.store.read(|conn| {
            let network = in_network(conn, pubkey)?;
            let mut stmt = conn.prepare("SELECT pubkey FROM authors WHERE muted = 0")?;
            let unmuted = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(unmuted
                .into_iter()
                .filter(|pk| !network.contains(pk))
                .collect())
        })
    }

    pub fn is_muted(&self, pubkey: &str) -> Result<bool> {
        self.store.read(|conn| {
            let muted: Option<bool> = conn
                .query_row(
                    "SELECT muted FROM authors WHERE pubkey = ?1",
                    params![pubkey],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(muted.unwrap_or(false))
        })
    }

    pub fn muted_authors(&self) -> Result<BTreeSet<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare("SELECT pubkey FROM authors WHERE muted = 1")?;
            let muted = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<BTreeSet<_>>>()?;
            Ok(muted)
        })
    }

    /// The mute list last committed for `owner`, in insertion order.
    pub fn mute_list(&self, owner: &str) -> Result<Vec<String>> {
        self.store.read(|conn| mute_list(conn, owner))
    }

    /// Mute `target` on behalf of `owner` and return the new list.
    ///
    /// Sets the muted flag, deletes every stored text note by `target`, and
    /// adds `target` to the list. The list is a set, so muting twice is a no-op.
    pub fn mute(&self, owner: &str, target: &str) -> Result<Vec<String>> {
        if owner == target {
            return Err(ClientError::InvalidRequest(
                "the local user cannot be muted".to_string(),
            ));
        }

        let (purged, list) = self.store.write(|tx| {
            ensure_author(tx, target)?;
            tx.execute(
                "UPDATE authors SET muted = 1 WHERE pubkey = ?1",
                params![target],
            )?;
            let purged = purge_posts_by(tx, target)?;
            tx.execute(
                "INSERT OR IGNORE INTO mute_list (owner, pubkey) VALUES (?1, ?2)",
                params![owner, target],
            )?;
            Ok((purged, mute_list(tx, owner)?))
        })?;

        info!(muted = %target, purged, "muted author");
        Ok(list)
    }

    /// Unmute `target` and return the new list.
    ///
    /// Posts deleted by an earlier mute are not restored.
    pub fn unmute(&self, owner: &str, target: &str) -> Result<Vec<String>> {
        let list = self.store.write(|tx| {
            tx.execute(
                "UPDATE authors SET muted = 0 WHERE pubkey = ?1",
                params![target],
            )?;
            tx.execute(
                "DELETE FROM mute_list WHERE owner = ?1 AND pubkey = ?2",
                params![owner, target],
            )?;
            mute_list(tx, owner)
        })?;

        info!(unmuted = %target, "unmuted author");
        Ok(list)
    }

    /// Adopt a mute list published by `owner` from another session.
    ///
    /// Ignored unless newer than the last list applied. Listed keys are muted
    /// (their posts deleted) and keys missing from the list are unmuted.
    /// Returns whether the list was applied.
    pub fn apply_mute_list(&self, owner: &str, list: &MuteList) -> Result<bool> {
        let applied = self.store.write(|tx| {
            ensure_author(tx, owner)?;
            let last: Option<u64> = tx.query_row(
                "SELECT mute_list_updated_at FROM authors WHERE pubkey = ?1",
                params![owner],
                |row| row.get(0),
            )?;
            if last.is_some_and(|at| at >= list.created_at) {
                return Ok(false);
            }

            let previous: BTreeSet<String> = mute_list(tx, owner)?.into_iter().collect();
            let next: Vec<&String> = list.pubkeys.iter().filter(|pk| *pk != owner).collect();

            tx.execute("DELETE FROM mute_list WHERE owner = ?1", params![owner])?;
            for pubkey in &next {
                ensure_author(tx, pubkey)?;
                tx.execute(
                    "INSERT OR IGNORE INTO mute_list (owner, pubkey) VALUES (?1, ?2)",
                    params![owner, pubkey],
                )?;
                let newly_muted = tx.execute(
                    "UPDATE authors SET muted = 1 WHERE pubkey = ?1 AND muted = 0",
                    params![pubkey],
                )?;
                if newly_muted > 0 {
                    purge_posts_by(tx, pubkey)?;
                }
            }
            for pubkey in previous.iter().filter(|pk| !next.contains(pk)) {
                tx.execute(
                    "UPDATE authors SET muted = 0 WHERE pubkey = ?1",
                    params![pubkey],
                )?;
            }

            set_mute_list_applied(tx, owner, list.created_at)?;
            Ok(true)
        })?;

        debug!(owner = %owner, created_at = list.created_at, applied, "received mute list");
        Ok(applied)
    }

    /// Record that `owner`'s list as of `created_at` is already reflected
    /// locally, so its echo from a relay is not re-applied.
    pub fn mark_mute_list_applied(&self, owner: &str, created_at: u64) -> Result<()> {
        self.store.write(|tx| {
            ensure_author(tx, owner)?;
            set_mute_list_applied(tx, owner, created_at)
        })
    }
}

fn set_mute_list_applied(conn: &Connection, owner: &str, created_at: u64) -> Result<()> {
    conn.execute(
        "UPDATE authors SET mute_list_updated_at = MAX(COALESCE(mute_list_updated_at, 0), ?2)
         WHERE pubkey = ?1",
        params![owner, created_at],
    )?;
    Ok(())
}

fn one_hop(conn: &Connection, pubkey: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT destination FROM follows WHERE source = ?1")?;
    let follows = stmt
        .query_map(params![pubkey], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(follows)
}

pub(crate) fn in_network(conn: &Connection, pubkey: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT f2.destination FROM follows f1
         JOIN follows f2 ON f2.source = f1.destination
         WHERE f1.source = ?1",
    )?;
    let two_hop = stmt
        .query_map(params![pubkey], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    let mut network = one_hop(conn, pubkey)?;
    network.extend(two_hop);
    network.insert(pubkey.to_string());
    Ok(network)
}

fn mute_list(conn: &Connection, owner: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT pubkey FROM mute_list WHERE owner = ?1 ORDER BY rowid")?;
    let list = stmt
        .query_map(params![owner], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(list)
}
