//! Periodic database sweep.
//!
//! Keeps the store bounded: old events nobody points at go, authors outside
//! the local user's network go, and the rows those deletions orphan follow.
//! References left dangling become stubs again so they can be re-fetched.

use crate::error::Result;
use crate::graph::in_network;
use crate::store::{EventStore, purge_event, unix_now};
use rusqlite::{Connection, params};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Row counts from one [`EventStore::cleanup`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub events: usize,
    pub authors: usize,
    pub follows: usize,
    pub relays: usize,
    /// Referenced ids turned back into stubs
    pub restubbed: usize,
}

impl EventStore {
    /// Delete what the local user no longer needs, in one transaction.
    ///
    /// Events received before `before` are removed unless they are the local
    /// user's, another event references them, or a relay has not acknowledged
    /// them yet. Expired events are removed regardless of age.
    pub fn cleanup(&self, before: u64, local_user: &str) -> Result<CleanupReport> {
        let now = unix_now();
        let report = self.write(|tx| {
            let mut report = CleanupReport::default();

            let references = tx.execute(
                "DELETE FROM event_references
                 WHERE event_id IN (SELECT id FROM events WHERE received_at < ?1)
                   AND referenced_id IN (SELECT id FROM events WHERE received_at < ?1)",
                params![before],
            )?;
            debug!(references, "dropped references between old events");

            let mut doomed = select_ids(
                tx,
                "SELECT e.id FROM events e
                 WHERE e.received_at < ?1
                   AND (e.pubkey IS NULL OR e.pubkey != ?2)
                   AND NOT EXISTS (SELECT 1 FROM event_references r WHERE r.referenced_id = e.id)
                   AND NOT EXISTS (SELECT 1 FROM publish_targets p
                                   WHERE p.event_id = e.id AND p.published = 0)",
                params![before, local_user],
            )?;
            doomed.extend(select_ids(
                tx,
                "SELECT id FROM events WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?);
            for id in &doomed {
                purge_event(tx, id)?;
            }
            report.events = doomed.len();

            let network = in_network(tx, local_user)?;
            let sources = select_ids(tx, "SELECT DISTINCT source FROM follows", [])?;
            for source in sources.iter().filter(|source| !network.contains(*source)) {
                report.follows +=
                    tx.execute("DELETE FROM follows WHERE source = ?1", params![source])?;
            }

            let strangers = select_ids(
                tx,
                "SELECT a.pubkey FROM authors a
                 WHERE a.muted = 0
                   AND NOT EXISTS (SELECT 1 FROM mute_list m WHERE m.pubkey = a.pubkey)
                   AND NOT EXISTS (SELECT 1 FROM events e WHERE e.pubkey = a.pubkey)
                   AND NOT EXISTS (SELECT 1 FROM author_references r WHERE r.pubkey = a.pubkey)
                   AND NOT EXISTS (SELECT 1 FROM follows f WHERE f.destination = a.pubkey)",
                [],
            )?;
            for pubkey in strangers.iter().filter(|pubkey| !network.contains(*pubkey)) {
                report.authors +=
                    tx.execute("DELETE FROM authors WHERE pubkey = ?1", params![pubkey])?;
            }

            delete_orphans(tx)?;

            report.relays = tx.execute(
                "DELETE FROM relays
                 WHERE address NOT IN (SELECT relay FROM event_relays)
                   AND address NOT IN (SELECT relay FROM author_relays)
                   AND address NOT IN (SELECT relay FROM publish_targets)",
                [],
            )?;

            report.restubbed = tx.execute(
                "INSERT OR IGNORE INTO events (id, received_at)
                 SELECT DISTINCT referenced_id, ?1 FROM event_references
                 WHERE referenced_id NOT IN (SELECT id FROM events)",
                params![now],
            )?;

            Ok(report)
        })?;

        info!(
            events = report.events,
            authors = report.authors,
            follows = report.follows,
            relays = report.relays,
            restubbed = report.restubbed,
            "database cleanup finished"
        );
        Ok(report)
    }
}

fn select_ids(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(ids)
}

/// Rows whose owning event or author is gone.
fn delete_orphans(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM event_tags WHERE event_id NOT IN (SELECT id FROM events);
         DELETE FROM event_relays WHERE event_id NOT IN (SELECT id FROM events);
         DELETE FROM publish_targets WHERE event_id NOT IN (SELECT id FROM events);
         DELETE FROM author_references WHERE event_id NOT IN (SELECT id FROM events);
         DELETE FROM event_references WHERE event_id NOT IN (SELECT id FROM events);
         DELETE FROM author_relays WHERE pubkey NOT IN (SELECT pubkey FROM authors);",
    )?;
    Ok(())
}
