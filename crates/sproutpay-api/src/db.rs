use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use sproutpay::{
    ChannelStats, ChannelStatus, ContractDetails, ContractFileType, EscrowType, LinkStatus,
    LinkType, NetworkStatus, PaymentLink, SettlementChannel,
};

use crate::error::ApiError;

/// Fields of a payment link chosen by its creator.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub link_type: LinkType,
    pub creator_address: String,
    pub target_address: Option<String>,
    pub amount: Decimal,
    pub token: String,
    pub chain: String,
    pub escrow_type: EscrowType,
    pub escrow_hours: Option<u32>,
    pub description: Option<String>,
    pub can_early_release: bool,
    pub attach_work_contract: bool,
    pub dispute_resolution: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub contract_terms: Option<String>,
    pub contract_file_url: Option<String>,
    pub contract_file_name: Option<String>,
    pub contract_file_type: Option<ContractFileType>,
    pub arbitrator_address: Option<String>,
    pub arbitration_fee: Option<Decimal>,
}

impl NewContract {
    /// Only stored when it carries terms, a file or an arbitrator.
    pub fn has_content(&self) -> bool {
        self.contract_terms.is_some()
            || self.contract_file_url.is_some()
            || self.arbitrator_address.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub channel_id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub asset: String,
    pub total_amount: Decimal,
    pub is_virtual: bool,
}

/// Result of mirroring a live channel status onto the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reconciled {
    /// The channel row moved forward.
    pub channel_advanced: bool,
    /// New link status, when the link moved.
    pub link_status: Option<LinkStatus>,
}

const LINK_COLUMNS: &str = "id, short_id, creator_address, link_type, target_address, amount, token, chain, \
     escrow_type, escrow_hours, description, status, can_early_release, early_released_at, \
     early_released_by, accepted_by, accepted_at, yellow_channel_id, nitrolite_transaction_hash, \
     yellow_network_status, attach_work_contract, dispute_resolution, created_at, expires_at, \
     updated_at, completed_at";

const CHANNEL_COLUMNS: &str = "id, payment_link_id, channel_id, participant_a, participant_b, asset, \
     total_amount, status, is_virtual, created_at, settled_at";

const CONTRACT_COLUMNS: &str = "id, payment_link_id, contract_terms, contract_file_url, \
     contract_file_name, contract_file_type, arbitrator_address, arbitration_fee, created_at";

/// SQLITE_CONSTRAINT_UNIQUE
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ApiError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), ApiError> {
        let conn = self.conn()?;

        // WAL for concurrent readers alongside the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS payment_links (
                id TEXT PRIMARY KEY,
                short_id TEXT UNIQUE NOT NULL,
                creator_address TEXT NOT NULL,
                link_type TEXT NOT NULL CHECK (link_type IN ('payer', 'receiver')),
                target_address TEXT,
                amount TEXT NOT NULL,
                token TEXT NOT NULL,
                chain TEXT NOT NULL,
                escrow_type TEXT NOT NULL CHECK (escrow_type IN ('instant_transfer', 'time_locked')),
                escrow_hours INTEGER,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'created',
                can_early_release INTEGER NOT NULL DEFAULT 1,
                early_released_at INTEGER,
                early_released_by TEXT,
                accepted_by TEXT,
                accepted_at INTEGER,
                yellow_channel_id TEXT,
                nitrolite_transaction_hash TEXT,
                yellow_network_status TEXT,
                attach_work_contract INTEGER NOT NULL DEFAULT 0,
                dispute_resolution INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER,
                CHECK ((escrow_type = 'time_locked') = (escrow_hours IS NOT NULL)),
                CHECK (accepted_by IS NULL OR lower(accepted_by) <> lower(creator_address))
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payment_links_status ON payment_links(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payment_links_creator ON payment_links(creator_address)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS contract_details (
                id TEXT PRIMARY KEY,
                payment_link_id TEXT UNIQUE NOT NULL REFERENCES payment_links(id),
                contract_terms TEXT,
                contract_file_url TEXT,
                contract_file_name TEXT,
                contract_file_type TEXT,
                arbitrator_address TEXT,
                arbitration_fee TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS yellow_channels (
                id TEXT PRIMARY KEY,
                payment_link_id TEXT UNIQUE NOT NULL REFERENCES payment_links(id),
                channel_id TEXT UNIQUE NOT NULL,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                asset TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                is_virtual INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                settled_at INTEGER
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_yellow_channels_status ON yellow_channels(status)",
            [],
        )?;

        Ok(())
    }

    /// Insert a link (and its contract, if any) under a fresh short id.
    ///
    /// `next_short_id` is asked for up to `SHORT_ID_ATTEMPTS` candidates; a
    /// candidate already in use is skipped.
    pub fn insert_link(
        &self,
        new: &NewLink,
        contract: Option<&NewContract>,
        now: i64,
        ttl_secs: i64,
        mut next_short_id: impl FnMut() -> String,
    ) -> Result<PaymentLink, ApiError> {
        if new.escrow_type == EscrowType::TimeLocked && new.escrow_hours.is_none() {
            return Err(ApiError::MissingEscrowHours);
        }

        let conn = self.conn()?;

        for attempt in 1..=sproutpay::SHORT_ID_ATTEMPTS {
            let short_id = next_short_id();

            let taken: bool = conn
                .query_row(
                    "SELECT 1 FROM payment_links WHERE short_id = ?1",
                    params![short_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if taken {
                tracing::debug!(attempt, "short id collision, retrying");
                continue;
            }

            let link = PaymentLink {
                id: uuid::Uuid::new_v4().to_string(),
                short_id,
                creator_address: new.creator_address.clone(),
                link_type: new.link_type,
                target_address: new.target_address.clone(),
                amount: new.amount,
                token: new.token.clone(),
                chain: new.chain.clone(),
                escrow_type: new.escrow_type,
                escrow_hours: match new.escrow_type {
                    EscrowType::TimeLocked => new.escrow_hours,
                    EscrowType::InstantTransfer => None,
                },
                description: new.description.clone(),
                status: LinkStatus::Created,
                can_early_release: new.can_early_release,
                early_released_at: None,
                early_released_by: None,
                accepted_by: None,
                accepted_at: None,
                yellow_channel_id: None,
                nitrolite_transaction_hash: None,
                yellow_network_status: None,
                attach_work_contract: new.attach_work_contract,
                dispute_resolution: new.dispute_resolution,
                created_at: now,
                expires_at: now + ttl_secs,
                updated_at: now,
                completed_at: None,
            };

            match insert_link_rows(&conn, &link, contract, now) {
                Ok(()) => return Ok(link),
                Err(rusqlite::Error::SqliteFailure(ref err, _))
                    if err.extended_code == SQLITE_CONSTRAINT_UNIQUE =>
                {
                    tracing::debug!(attempt, "short id taken at insert, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ApiError::IdGenerationExhausted)
    }

    /// Look up by id when `key` parses as a UUID, by short id otherwise.
    pub fn find_link(&self, key: &str) -> Result<Option<PaymentLink>, ApiError> {
        let column = if uuid::Uuid::parse_str(key).is_ok() {
            "id"
        } else {
            "short_id"
        };
        let conn = self.conn()?;
        let link = conn
            .query_row(
                &format!("SELECT {LINK_COLUMNS} FROM payment_links WHERE {column} = ?1"),
                params![key],
                link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    pub fn get_link(&self, id: &str) -> Result<Option<PaymentLink>, ApiError> {
        let conn = self.conn()?;
        Ok(load_link(&conn, id)?)
    }

    pub fn get_contract_details(&self, link_id: &str) -> Result<Option<ContractDetails>, ApiError> {
        let conn = self.conn()?;
        let details = conn
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} FROM contract_details WHERE payment_link_id = ?1"),
                params![link_id],
                contract_from_row,
            )
            .optional()?;
        Ok(details)
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<SettlementChannel>, ApiError> {
        let conn = self.conn()?;
        Ok(load_channel(&conn, channel_id)?)
    }

    pub fn get_channel_for_link(&self, link_id: &str) -> Result<Option<SettlementChannel>, ApiError> {
        let conn = self.conn()?;
        let channel = conn
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM yellow_channels WHERE payment_link_id = ?1"),
                params![link_id],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    /// Lock an acceptable, unexpired link for `acceptor`. Exactly one of any
    /// number of concurrent callers gets `true`.
    pub fn begin_acceptance(&self, id: &str, acceptor: &str, now: i64) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'processing', accepted_by = ?2, accepted_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status IN ({}) AND expires_at >= ?3",
                status_list(&LinkStatus::ACCEPTABLE)
            ),
            params![id, acceptor, now],
        )?;
        Ok(rows == 1)
    }

    /// Record the channel and move the link from `processing` to `channel_active`.
    pub fn activate_channel(
        &self,
        link_id: &str,
        channel: &NewChannel,
        now: i64,
    ) -> Result<SettlementChannel, ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let record = SettlementChannel {
            id: uuid::Uuid::new_v4().to_string(),
            payment_link_id: link_id.to_string(),
            channel_id: channel.channel_id.clone(),
            participant_a: channel.participant_a.clone(),
            participant_b: channel.participant_b.clone(),
            asset: channel.asset.clone(),
            total_amount: channel.total_amount,
            status: ChannelStatus::Active,
            is_virtual: channel.is_virtual,
            created_at: now,
            settled_at: None,
        };

        tx.execute(
            &format!(
                "INSERT INTO yellow_channels ({CHANNEL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.id,
                record.payment_link_id,
                record.channel_id,
                record.participant_a,
                record.participant_b,
                record.asset,
                record.total_amount.to_string(),
                record.status.as_str(),
                record.is_virtual,
                record.created_at,
                record.settled_at,
            ],
        )?;

        let rows = tx.execute(
            "UPDATE payment_links
             SET status = 'channel_active', yellow_channel_id = ?2,
                 yellow_network_status = 'active', updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![link_id, record.channel_id, now],
        )?;
        if rows != 1 {
            return Err(ApiError::Internal(format!(
                "link {link_id} left processing during channel setup"
            )));
        }

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit channel activation: {e}")))?;

        Ok(record)
    }

    /// Compensating write after a failed channel setup or settlement.
    pub fn fail_link(&self, id: &str, now: i64) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'failed', yellow_network_status = 'failed', updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::predecessors_of(LinkStatus::Failed))
            ),
            params![id, now],
        )?;
        Ok(rows == 1)
    }

    pub fn mark_disputed(&self, id: &str, now: i64) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'disputed', yellow_network_status = 'disputed', updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::FUNDED)
            ),
            params![id, now],
        )?;
        Ok(rows == 1)
    }

    /// Early release after the network transferred the funds.
    pub fn complete_early_release(
        &self,
        link_id: &str,
        channel_id: &str,
        releaser: &str,
        reference: &str,
        now: i64,
    ) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let rows = tx.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'early_released', yellow_network_status = 'settled',
                     early_released_at = ?2, early_released_by = ?3, completed_at = ?2,
                     nitrolite_transaction_hash = ?4, updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::FUNDED)
            ),
            params![link_id, now, releaser, reference],
        )?;
        if rows != 1 {
            return Ok(false);
        }

        settle_channel_row(&tx, channel_id, ChannelStatus::Settled, now)?;

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit early release: {e}")))?;
        Ok(true)
    }

    /// `released` then `completed`, plus the channel, in one transaction.
    pub fn complete_release(
        &self,
        link_id: &str,
        channel_id: &str,
        reference: &str,
        now: i64,
    ) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let rows = tx.execute(
            &format!(
                "UPDATE payment_links SET status = 'released', updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::predecessors_of(LinkStatus::Released))
            ),
            params![link_id, now],
        )?;
        if rows != 1 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE payment_links
             SET status = 'completed', yellow_network_status = 'settled', completed_at = ?2,
                 nitrolite_transaction_hash = ?3, updated_at = ?2
             WHERE id = ?1 AND status = 'released'",
            params![link_id, now, reference],
        )?;

        settle_channel_row(&tx, channel_id, ChannelStatus::Settled, now)?;

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit release: {e}")))?;
        Ok(true)
    }

    /// Cross-chain settlement succeeded: channel settled, link completed.
    pub fn complete_settlement(
        &self,
        channel_id: &str,
        reference: &str,
        now: i64,
    ) -> Result<Option<LinkStatus>, ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let Some(channel) = load_channel(&tx, channel_id)? else {
            return Err(ApiError::ChannelNotFound(channel_id.to_string()));
        };
        settle_channel_row(&tx, channel_id, ChannelStatus::Settled, now)?;

        let rows = tx.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'completed', yellow_network_status = 'settled', completed_at = ?2,
                     nitrolite_transaction_hash = ?3, updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::predecessors_of(LinkStatus::Completed))
            ),
            params![channel.payment_link_id, now, reference],
        )?;

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit settlement: {e}")))?;
        Ok((rows == 1).then_some(LinkStatus::Completed))
    }

    /// Settlement failed: channel closed, link failed.
    pub fn fail_settlement(&self, channel_id: &str, now: i64) -> Result<(), ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let Some(channel) = load_channel(&tx, channel_id)? else {
            return Err(ApiError::ChannelNotFound(channel_id.to_string()));
        };
        settle_channel_row(&tx, channel_id, ChannelStatus::Closed, now)?;

        tx.execute(
            &format!(
                "UPDATE payment_links
                 SET status = 'failed', yellow_network_status = 'failed', updated_at = ?2
                 WHERE id = ?1 AND status IN ({})",
                status_list(&LinkStatus::predecessors_of(LinkStatus::Failed))
            ),
            params![channel.payment_link_id, now],
        )?;

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit settlement failure: {e}")))?;
        Ok(())
    }

    /// Non-virtual channels still worth polling.
    pub fn list_open_channels(&self) -> Result<Vec<SettlementChannel>, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM yellow_channels
             WHERE is_virtual = 0 AND status IN ('active', 'processing')
             ORDER BY created_at ASC"
        ))?;
        let channels = stmt
            .query_map([], channel_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    /// Mirror a live channel status. The channel only moves forward and the
    /// link only along a legal edge, so a stale report never regresses either.
    pub fn reconcile_channel(
        &self,
        channel_id: &str,
        live: ChannelStatus,
        now: i64,
    ) -> Result<Reconciled, ApiError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ApiError::Internal(format!("failed to begin transaction: {e}")))?;

        let Some(channel) = load_channel(&tx, channel_id)? else {
            return Err(ApiError::ChannelNotFound(channel_id.to_string()));
        };
        if !channel.status.can_advance_to(live) {
            return Ok(Reconciled::default());
        }

        tx.execute(
            "UPDATE yellow_channels
             SET status = ?2, settled_at = CASE WHEN ?2 = 'settled' THEN ?3 ELSE settled_at END
             WHERE channel_id = ?1",
            params![channel_id, live.as_str(), now],
        )?;

        let mut outcome = Reconciled {
            channel_advanced: true,
            link_status: None,
        };

        let (target, network) = live.link_mapping();
        if let Some(link) = load_link(&tx, &channel.payment_link_id)? {
            if link.status != target && link.status.can_transition_to(target) {
                let completed_at = (target == LinkStatus::Completed).then_some(now);
                let rows = tx.execute(
                    "UPDATE payment_links
                     SET status = ?3, yellow_network_status = ?4,
                         completed_at = COALESCE(?5, completed_at), updated_at = ?6
                     WHERE id = ?1 AND status = ?2",
                    params![
                        link.id,
                        link.status.as_str(),
                        target.as_str(),
                        network.as_str(),
                        completed_at,
                        now
                    ],
                )?;
                if rows == 1 {
                    outcome.link_status = Some(target);
                }
            }
        }

        tx.commit()
            .map_err(|e| ApiError::Internal(format!("failed to commit reconciliation: {e}")))?;
        Ok(outcome)
    }

    pub fn channel_stats(&self) -> Result<ChannelStats, ApiError> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'active'), 0),
                    COALESCE(SUM(status = 'settled'), 0),
                    COALESCE(SUM(status = 'closed'), 0)
             FROM yellow_channels",
            [],
            |row| {
                Ok(ChannelStats {
                    total_channels: row.get::<_, i64>(0)? as u64,
                    active_channels: row.get::<_, i64>(1)? as u64,
                    settled_channels: row.get::<_, i64>(2)? as u64,
                    failed_channels: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

fn insert_link_rows(
    conn: &Connection,
    link: &PaymentLink,
    contract: Option<&NewContract>,
    now: i64,
) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        &format!(
            "INSERT INTO payment_links ({LINK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
        ),
        params![
            link.id,
            link.short_id,
            link.creator_address,
            link.link_type.as_str(),
            link.target_address,
            link.amount.to_string(),
            link.token,
            link.chain,
            link.escrow_type.as_str(),
            link.escrow_hours,
            link.description,
            link.status.as_str(),
            link.can_early_release,
            link.early_released_at,
            link.early_released_by,
            link.accepted_by,
            link.accepted_at,
            link.yellow_channel_id,
            link.nitrolite_transaction_hash,
            link.yellow_network_status.map(|s| s.as_str()),
            link.attach_work_contract,
            link.dispute_resolution,
            link.created_at,
            link.expires_at,
            link.updated_at,
            link.completed_at,
        ],
    )?;

    if let Some(contract) = contract.filter(|c| link.attach_work_contract && c.has_content()) {
        tx.execute(
            &format!(
                "INSERT INTO contract_details ({CONTRACT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                uuid::Uuid::new_v4().to_string(),
                link.id,
                contract.contract_terms,
                contract.contract_file_url,
                contract.contract_file_name,
                contract.contract_file_type.map(|t| t.as_str()),
                contract.arbitrator_address,
                contract.arbitration_fee.map(|f| f.to_string()),
                now,
            ],
        )?;
    }

    tx.commit()
}

/// Close or settle an open channel row.
fn settle_channel_row(
    conn: &Connection,
    channel_id: &str,
    status: ChannelStatus,
    now: i64,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE yellow_channels SET status = ?2, settled_at = ?3
         WHERE channel_id = ?1 AND status IN ('active', 'processing')",
        params![channel_id, status.as_str(), now],
    )
}

fn load_link(conn: &Connection, id: &str) -> Result<Option<PaymentLink>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {LINK_COLUMNS} FROM payment_links WHERE id = ?1"),
        params![id],
        link_from_row,
    )
    .optional()
}

fn load_channel(
    conn: &Connection,
    channel_id: &str,
) -> Result<Option<SettlementChannel>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {CHANNEL_COLUMNS} FROM yellow_channels WHERE channel_id = ?1"),
        params![channel_id],
        channel_from_row,
    )
    .optional()
}

/// `'a', 'b'` literal list for a status `IN (...)` clause.
fn status_list(statuses: &[LinkStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TEXT column through `FromStr`.
fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentLink> {
    Ok(PaymentLink {
        id: row.get(0)?,
        short_id: row.get(1)?,
        creator_address: row.get(2)?,
        link_type: parsed(row, 3)?,
        target_address: row.get(4)?,
        amount: parsed::<Decimal>(row, 5)?,
        token: row.get(6)?,
        chain: row.get(7)?,
        escrow_type: parsed(row, 8)?,
        escrow_hours: row.get(9)?,
        description: row.get(10)?,
        status: parsed(row, 11)?,
        can_early_release: row.get(12)?,
        early_released_at: row.get(13)?,
        early_released_by: row.get(14)?,
        accepted_by: row.get(15)?,
        accepted_at: row.get(16)?,
        yellow_channel_id: row.get(17)?,
        nitrolite_transaction_hash: row.get(18)?,
        yellow_network_status: parsed_opt::<NetworkStatus>(row, 19)?,
        attach_work_contract: row.get(20)?,
        dispute_resolution: row.get(21)?,
        created_at: row.get(22)?,
        expires_at: row.get(23)?,
        updated_at: row.get(24)?,
        completed_at: row.get(25)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<SettlementChannel> {
    Ok(SettlementChannel {
        id: row.get(0)?,
        payment_link_id: row.get(1)?,
        channel_id: row.get(2)?,
        participant_a: row.get(3)?,
        participant_b: row.get(4)?,
        asset: row.get(5)?,
        total_amount: parsed::<Decimal>(row, 6)?,
        status: parsed(row, 7)?,
        is_virtual: row.get(8)?,
        created_at: row.get(9)?,
        settled_at: row.get(10)?,
    })
}

fn contract_from_row(row: &Row<'_>) -> rusqlite::Result<ContractDetails> {
    Ok(ContractDetails {
        id: row.get(0)?,
        payment_link_id: row.get(1)?,
        contract_terms: row.get(2)?,
        contract_file_url: row.get(3)?,
        contract_file_name: row.get(4)?,
        contract_file_type: parsed_opt::<ContractFileType>(row, 5)?,
        arbitrator_address: row.get(6)?,
        arbitration_fee: parsed_opt::<Decimal>(row, 7)?,
        created_at: row.get(8)?,
    })
}
