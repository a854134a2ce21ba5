//! ProposalIndex - actor that owns the SQLite proposal cache
//!
//! Processes commands via channels so a single connection serves every caller.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::query::CachePredicate;
use crate::domain::Proposal;
use crate::retry::Retryable;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS proposals (
    proposal_id TEXT PRIMARY KEY,
    provider_id TEXT NOT NULL,
    origin TEXT NOT NULL,
    origin_time INTEGER NOT NULL,
    destination TEXT NOT NULL,
    destination_time INTEGER NOT NULL,
    price REAL NOT NULL,
    valid_until INTEGER NOT NULL,
    body TEXT NOT NULL,
    indexed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proposals_route
    ON proposals (origin, destination, origin_time);

CREATE INDEX IF NOT EXISTS idx_proposals_price
    ON proposals (price);

CREATE INDEX IF NOT EXISTS idx_proposals_valid_until
    ON proposals (valid_until);

CREATE INDEX IF NOT EXISTS idx_proposals_provider
    ON proposals (provider_id);
"#;

/// Errors from index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("cannot encode proposal: {0}")]
    Codec(String),

    #[error("index actor is gone")]
    ChannelError,
}

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Sqlite(_))
    }
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        IndexError::is_retryable(self)
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Sqlite(e.to_string())
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Commands sent to the index actor
#[derive(Debug)]
enum IndexCommand {
    Upsert {
        provider_id: String,
        proposals: Vec<Proposal>,
        reply: oneshot::Sender<IndexResult<usize>>,
    },
    Find {
        predicate: CachePredicate,
        reply: oneshot::Sender<IndexResult<Vec<Proposal>>>,
    },
    Count {
        provider_id: Option<String>,
        reply: oneshot::Sender<IndexResult<u64>>,
    },
}

/// Handle to send commands to the index actor
#[derive(Debug, Clone)]
pub struct ProposalIndex {
    tx: mpsc::Sender<IndexCommand>,
}

impl ProposalIndex {
    /// Open (or create) the cache at `path` and spawn its actor; ":memory:" keeps it in RAM
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "ProposalIndex::open: called");
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::Sqlite(e.to_string()))?;
            }
            Connection::open(path)?
        };
        conn.busy_timeout(Duration::from_secs(5))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(IndexStore::new(conn), rx));
        info!(path = %path.display(), "ProposalIndex spawned");
        Ok(Self { tx })
    }

    pub fn open_in_memory() -> IndexResult<Self> {
        Self::open(":memory:")
    }

    /// Create or overwrite entries for `proposals`, tagged with their provider
    pub async fn upsert(&self, provider_id: &str, proposals: Vec<Proposal>) -> IndexResult<usize> {
        debug!(provider_id, count = proposals.len(), "ProposalIndex::upsert: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IndexCommand::Upsert {
                provider_id: provider_id.to_string(),
                proposals,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IndexError::ChannelError)?;
        reply_rx.await.map_err(|_| IndexError::ChannelError)?
    }

    /// Full proposal bodies matching `predicate`
    pub async fn find(&self, predicate: CachePredicate) -> IndexResult<Vec<Proposal>> {
        debug!(?predicate, "ProposalIndex::find: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IndexCommand::Find {
                predicate,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IndexError::ChannelError)?;
        reply_rx.await.map_err(|_| IndexError::ChannelError)?
    }

    pub async fn count(&self) -> IndexResult<u64> {
        self.count_where(None).await
    }

    pub async fn count_for_provider(&self, provider_id: &str) -> IndexResult<u64> {
        self.count_where(Some(provider_id.to_string())).await
    }

    async fn count_where(&self, provider_id: Option<String>) -> IndexResult<u64> {
        debug!(?provider_id, "ProposalIndex::count_where: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IndexCommand::Count {
                provider_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IndexError::ChannelError)?;
        reply_rx.await.map_err(|_| IndexError::ChannelError)?
    }
}

/// Connection plus lazily created schema
struct IndexStore {
    conn: Connection,
    schema_ready: bool,
}

impl IndexStore {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            schema_ready: false,
        }
    }

    /// Create tables and indexes unless another instance already did
    fn ensure_schema(&mut self) -> IndexResult<()> {
        if self.schema_ready {
            return Ok(());
        }
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'proposals'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            info!("ProposalIndex: creating schema");
            self.conn.execute_batch(SCHEMA)?;
        } else {
            debug!("ProposalIndex: schema already present");
        }
        self.schema_ready = true;
        Ok(())
    }

    fn upsert(&mut self, provider_id: &str, proposals: &[Proposal]) -> IndexResult<usize> {
        self.ensure_schema()?;
        let indexed_at = Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        for proposal in proposals {
            let body = serde_json::to_string(proposal).map_err(|e| IndexError::Codec(e.to_string()))?;
            tx.execute(
                "INSERT INTO proposals (proposal_id, provider_id, origin, origin_time, destination, destination_time, \
                 price, valid_until, body, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(proposal_id) DO UPDATE SET \
                 provider_id = excluded.provider_id, origin = excluded.origin, origin_time = excluded.origin_time, \
                 destination = excluded.destination, destination_time = excluded.destination_time, \
                 price = excluded.price, valid_until = excluded.valid_until, body = excluded.body, \
                 indexed_at = excluded.indexed_at",
                params![
                    proposal.id,
                    provider_id,
                    proposal.origin().name,
                    proposal.origin().at.timestamp_millis(),
                    proposal.destination().name,
                    proposal.destination().at.timestamp_millis(),
                    proposal.total_price(),
                    proposal.valid_until.timestamp_millis(),
                    body,
                    indexed_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(proposals.len())
    }

    fn find(&mut self, predicate: &CachePredicate) -> IndexResult<Vec<Proposal>> {
        self.ensure_schema()?;
        let mut sql =
            String::from("SELECT body FROM proposals WHERE origin = ?1 AND destination = ?2 AND origin_time = ?3");
        let mut values = vec![
            Value::Text(predicate.origin.clone()),
            Value::Text(predicate.destination.clone()),
            Value::Integer(predicate.origin_time.timestamp_millis()),
        ];
        if let Some(at) = predicate.destination_time {
            values.push(Value::Integer(at.timestamp_millis()));
            sql.push_str(&format!(" AND destination_time = ?{}", values.len()));
        }
        if let Some(max) = predicate.max_price {
            values.push(Value::Real(max));
            sql.push_str(&format!(" AND price <= ?{}", values.len()));
        }
        if let Some(min) = predicate.min_valid_until {
            values.push(Value::Integer(min.timestamp_millis()));
            sql.push_str(&format!(" AND valid_until >= ?{}", values.len()));
        }
        sql.push_str(" ORDER BY indexed_at, proposal_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let proposals = bodies
            .iter()
            .filter_map(|body| match serde_json::from_str::<Proposal>(body) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "ProposalIndex: skipping undecodable cache entry");
                    None
                }
            })
            .collect();
        Ok(proposals)
    }

    fn count(&mut self, provider_id: Option<&str>) -> IndexResult<u64> {
        self.ensure_schema()?;
        let count: i64 = match provider_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM proposals WHERE provider_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM proposals", [], |row| row.get(0))?,
        };
        Ok(count.max(0) as u64)
    }
}

async fn actor_loop(mut store: IndexStore, mut rx: mpsc::Receiver<IndexCommand>) {
    debug!("ProposalIndex actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            IndexCommand::Upsert {
                provider_id,
                proposals,
                reply,
            } => {
                debug!(%provider_id, count = proposals.len(), "actor_loop: Upsert command");
                let _ = reply.send(store.upsert(&provider_id, &proposals));
            }
            IndexCommand::Find { predicate, reply } => {
                debug!("actor_loop: Find command");
                let _ = reply.send(store.find(&predicate));
            }
            IndexCommand::Count { provider_id, reply } => {
                debug!(?provider_id, "actor_loop: Count command");
                let _ = reply.send(store.count(provider_id.as_deref()));
            }
        }
    }

    debug!("ProposalIndex actor stopped");
}
