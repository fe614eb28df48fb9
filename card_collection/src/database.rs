//! SQLite collection store
//!
//! Three tables: `users`, `cards` and the `user_cards` ownership join. Every
//! request opens its own session (connection) and drops it when done.
//! Recording a detection runs in one IMMEDIATE transaction, so concurrent
//! writers queue on the database lock instead of racing between the lookup
//! and the write. The UNIQUE (user_id, card_id) constraint backs this up:
//! ownership is written with a single insert-or-increment statement.

use crate::error::{CollectionError, Result};
use crate::pricing::Price;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Default wait for a competing writer before SQLite reports BUSY
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `users`: one row per external identity
/// - `cards`: one row per card name with its last observed price
/// - `user_cards`: ownership with quantity, cascading on user/card delete
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT,
            photo_url TEXT
        );

        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            price TEXT NOT NULL DEFAULT '0.00'
        );

        CREATE TABLE IF NOT EXISTS user_cards (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
            UNIQUE (user_id, card_id)
        );

        CREATE INDEX IF NOT EXISTS idx_user_cards_card ON user_cards(card_id);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Handle to the collection database.
///
/// Cheap to clone; each `session()` is an independent connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Open (or create) the database file and initialise the schema
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        };
        let conn = db.session()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        init_schema(&conn)?;
        log::info!("Opened database: {}", db.path.display());
        Ok(db)
    }

    /// Acquire a connection scoped to one unit of work
    pub fn session(&self) -> DbResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }
}

// ── Rows ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub external_id: String,
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardRow {
    pub id: i64,
    pub name: String,
    pub price: Price,
}

/// One entry of a user's collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnedCard {
    pub name: String,
    pub price: Price,
    pub quantity: i64,
}

/// Whether a detection created or incremented an ownership row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipAction {
    Added,
    Updated,
}

/// Outcome of recording one detection
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub action: OwnershipAction,
    pub quantity: i64,
    pub user_id: i64,
    pub card_id: i64,
    /// Price the card carried before this detection (None if newly created)
    pub previous_price: Option<Price>,
}

// ── Users ──────────────────────────────────────────────────────────────────

pub fn find_user(conn: &Connection, external_id: &str) -> DbResult<Option<UserRow>> {
    conn.query_row(
        "SELECT id, external_id, name, photo_url FROM users WHERE external_id = ?1",
        params![external_id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                external_id: row.get(1)?,
                name: row.get(2)?,
                photo_url: row.get(3)?,
            })
        },
    )
    .optional()
}

/// Return the user for `external_id`, creating it (no name, no photo) if absent
pub fn find_or_create_user(conn: &Connection, external_id: &str) -> DbResult<UserRow> {
    if let Some(user) = find_user(conn, external_id)? {
        return Ok(user);
    }
    conn.execute(
        "INSERT INTO users (external_id) VALUES (?1)
         ON CONFLICT(external_id) DO NOTHING",
        params![external_id],
    )?;
    log::info!("Created user {}", external_id);
    find_user(conn, external_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Administrative removal; ownership rows cascade
pub fn delete_user(conn: &Connection, external_id: &str) -> DbResult<bool> {
    let n = conn.execute(
        "DELETE FROM users WHERE external_id = ?1",
        params![external_id],
    )?;
    Ok(n > 0)
}

// ── Cards ──────────────────────────────────────────────────────────────────

pub fn find_card(conn: &Connection, name: &str) -> DbResult<Option<CardRow>> {
    conn.query_row(
        "SELECT id, name, price FROM cards WHERE name = ?1",
        params![name],
        |row| {
            Ok(CardRow {
                id: row.get(0)?,
                name: row.get(1)?,
                price: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Create the card, or overwrite its price if it exists.
///
/// Last write wins, including a zero price. Returns the card and the price
/// it had before (None when the card was just created).
pub fn upsert_card_price(
    conn: &Connection,
    name: &str,
    price: Price,
) -> DbResult<(CardRow, Option<Price>)> {
    match find_card(conn, name)? {
        Some(existing) => {
            conn.execute(
                "UPDATE cards SET price = ?1 WHERE id = ?2",
                params![price, existing.id],
            )?;
            let previous = existing.price;
            Ok((
                CardRow {
                    price,
                    ..existing
                },
                Some(previous),
            ))
        }
        None => {
            conn.execute(
                "INSERT INTO cards (name, price) VALUES (?1, ?2)",
                params![name, price],
            )?;
            log::info!("Created card {} at {}", name, price);
            Ok((
                CardRow {
                    id: conn.last_insert_rowid(),
                    name: name.to_string(),
                    price,
                },
                None,
            ))
        }
    }
}

/// Administrative removal; ownership rows cascade
pub fn delete_card(conn: &Connection, name: &str) -> DbResult<bool> {
    let n = conn.execute("DELETE FROM cards WHERE name = ?1", params![name])?;
    Ok(n > 0)
}

// ── Ownership ──────────────────────────────────────────────────────────────

/// Insert the ownership row with quantity 1, or increment it by exactly 1.
///
/// Single statement, so two writers can never both insert.
pub fn record_ownership(
    conn: &Connection,
    user_id: i64,
    card_id: i64,
) -> DbResult<(OwnershipAction, i64)> {
    let quantity: i64 = conn.query_row(
        "INSERT INTO user_cards (user_id, card_id, quantity) VALUES (?1, ?2, 1)
         ON CONFLICT(user_id, card_id) DO UPDATE SET quantity = quantity + 1
         RETURNING quantity",
        params![user_id, card_id],
        |row| row.get(0),
    )?;

    let action = if quantity == 1 {
        OwnershipAction::Added
    } else {
        OwnershipAction::Updated
    };
    Ok((action, quantity))
}

/// Steps 4a-4c of recording a detection, committed atomically.
///
/// A BUSY/LOCKED failure (another writer held the lock past the busy timeout)
/// is retried once; anything else is returned with nothing applied.
pub fn record_detection(
    conn: &mut Connection,
    external_id: &str,
    card_name: &str,
    price: Price,
) -> DbResult<Recorded> {
    retry_once_on_contention(|| record_detection_tx(conn, external_id, card_name, price))
}

/// Run `attempt`, and run it once more if it failed on BUSY/LOCKED
fn retry_once_on_contention<T>(mut attempt: impl FnMut() -> DbResult<T>) -> DbResult<T> {
    match attempt() {
        Err(e) if is_contention(&e) => {
            log::warn!("Database contention, retrying once: {}", e);
            attempt()
        }
        other => other,
    }
}

fn record_detection_tx(
    conn: &mut Connection,
    external_id: &str,
    card_name: &str,
    price: Price,
) -> DbResult<Recorded> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let user = find_or_create_user(&tx, external_id)?;
    let (card, previous_price) = upsert_card_price(&tx, card_name, price)?;
    let (action, quantity) = record_ownership(&tx, user.id, card.id)?;

    tx.commit()?;

    log::debug!(
        "Recorded {} for {}: {:?}, quantity {}",
        card_name,
        external_id,
        action,
        quantity
    );

    Ok(Recorded {
        action,
        quantity,
        user_id: user.id,
        card_id: card.id,
        previous_price,
    })
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Delete exactly one ownership row
pub fn remove_ownership(conn: &mut Connection, external_id: &str, card_name: &str) -> Result<()> {
    let tx = conn.transaction()?;

    let user = find_user(&tx, external_id)?.ok_or(CollectionError::UserNotFound)?;
    let card = find_card(&tx, card_name)?.ok_or(CollectionError::CardNotFound)?;

    let removed = tx.execute(
        "DELETE FROM user_cards WHERE user_id = ?1 AND card_id = ?2",
        params![user.id, card.id],
    )?;
    if removed == 0 {
        return Err(CollectionError::NotOwned);
    }

    tx.commit()?;
    log::info!("Removed {} from {}", card_name, external_id);
    Ok(())
}

/// All cards a user owns, ordered by card name
pub fn list_ownership(conn: &Connection, external_id: &str) -> Result<Vec<OwnedCard>> {
    let user = find_user(conn, external_id)?.ok_or(CollectionError::UserNotFound)?;

    let mut stmt = conn.prepare_cached(
        "SELECT c.name, c.price, uc.quantity
         FROM user_cards uc
         JOIN cards c ON c.id = uc.card_id
         WHERE uc.user_id = ?1
         ORDER BY c.name, c.id",
    )?;

    let cards = stmt
        .query_map(params![user.id], |row| {
            Ok(OwnedCard {
                name: row.get(0)?,
                price: row.get(1)?,
                quantity: row.get(2)?,
            })
        })?
        .collect::<DbResult<Vec<_>>>()?;
    Ok(cards)
}

pub fn get_user_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
}

pub fn get_card_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))
}

pub fn get_ownership_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM user_cards", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    /// Create an in-memory database for testing
    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("test.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        (db, dir)
    }

    #[test]
    fn init_schema_creates_tables() {
        let conn = test_conn();
        for table in ["users", "cards", "user_cards"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = test_conn();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn find_or_create_user_creates_once() {
        let conn = test_conn();
        let first = find_or_create_user(&conn, "user_1").unwrap();
        let second = find_or_create_user(&conn, "user_1").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, None);
        assert_eq!(first.photo_url, None);
        assert_eq!(get_user_count(&conn).unwrap(), 1);
    }

    #[test]
    fn upsert_card_price_overwrites_including_zero() {
        let conn = test_conn();

        let (card, previous) = upsert_card_price(&conn, "Pikachu", price("4.20")).unwrap();
        assert_eq!(previous, None);
        assert_eq!(card.price, price("4.20"));

        let (updated, previous) = upsert_card_price(&conn, "Pikachu", Price::ZERO).unwrap();
        assert_eq!(updated.id, card.id);
        assert_eq!(previous, Some(price("4.20")));
        assert_eq!(find_card(&conn, "Pikachu").unwrap().unwrap().price, Price::ZERO);
        assert_eq!(get_card_count(&conn).unwrap(), 1);
    }

    #[test]
    fn record_ownership_adds_then_increments() {
        let conn = test_conn();
        let user = find_or_create_user(&conn, "u").unwrap();
        let (card, _) = upsert_card_price(&conn, "Eevee", price("1.00")).unwrap();

        assert_eq!(
            record_ownership(&conn, user.id, card.id).unwrap(),
            (OwnershipAction::Added, 1)
        );
        assert_eq!(
            record_ownership(&conn, user.id, card.id).unwrap(),
            (OwnershipAction::Updated, 2)
        );
        assert_eq!(get_ownership_count(&conn).unwrap(), 1);
    }

    #[test]
    fn record_detection_n_times_yields_quantity_n() {
        let mut conn = test_conn();
        for i in 1..=5 {
            let recorded = record_detection(&mut conn, "ash", "Charizard", price("300.00")).unwrap();
            assert_eq!(recorded.quantity, i);
        }
        assert_eq!(get_user_count(&conn).unwrap(), 1);
        assert_eq!(get_card_count(&conn).unwrap(), 1);
        assert_eq!(get_ownership_count(&conn).unwrap(), 1);
    }

    #[test]
    fn record_detection_keeps_identity_and_refreshes_price() {
        let mut conn = test_conn();
        let first = record_detection(&mut conn, "misty", "Staryu", price("0.50")).unwrap();
        assert_eq!(first.action, OwnershipAction::Added);
        assert_eq!(first.previous_price, None);

        let second = record_detection(&mut conn, "misty", "Staryu", price("0.75")).unwrap();
        assert_eq!(second.action, OwnershipAction::Updated);
        assert_eq!(second.user_id, first.user_id);
        assert_eq!(second.card_id, first.card_id);
        assert_eq!(second.previous_price, Some(price("0.50")));
        assert_eq!(find_card(&conn, "Staryu").unwrap().unwrap().price, price("0.75"));
    }

    #[test]
    fn price_refresh_is_visible_to_other_owners() {
        let mut conn = test_conn();
        record_detection(&mut conn, "a", "Mew", price("10.00")).unwrap();
        record_detection(&mut conn, "b", "Mew", price("12.00")).unwrap();

        let cards = list_ownership(&conn, "a").unwrap();
        assert_eq!(cards[0].price, price("12.00"));
        assert_eq!(cards[0].quantity, 1);
    }

    #[test]
    fn record_detection_rolls_back_on_failure() {
        let mut conn = test_conn();
        // Make the ownership insert fail after user and card were written
        conn.execute_batch(
            "CREATE TRIGGER fail_ownership BEFORE INSERT ON user_cards
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();

        assert!(record_detection(&mut conn, "brock", "Onix", price("2.00")).is_err());
        assert_eq!(get_user_count(&conn).unwrap(), 0);
        assert_eq!(get_card_count(&conn).unwrap(), 0);
    }

    #[test]
    fn remove_ownership_deletes_only_the_join_row() {
        let mut conn = test_conn();
        record_detection(&mut conn, "gary", "Eevee", price("1.00")).unwrap();
        record_detection(&mut conn, "gary", "Jolteon", price("3.00")).unwrap();

        remove_ownership(&mut conn, "gary", "Eevee").unwrap();

        let names: Vec<String> = list_ownership(&conn, "gary")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Jolteon".to_string()]);
        assert!(find_card(&conn, "Eevee").unwrap().is_some());
        assert!(find_user(&conn, "gary").unwrap().is_some());
    }

    #[test]
    fn remove_ownership_reports_what_is_missing() {
        let mut conn = test_conn();
        record_detection(&mut conn, "gary", "Eevee", price("1.00")).unwrap();
        record_detection(&mut conn, "ash", "Pikachu", price("1.00")).unwrap();

        assert!(matches!(
            remove_ownership(&mut conn, "nobody", "Eevee"),
            Err(CollectionError::UserNotFound)
        ));
        assert!(matches!(
            remove_ownership(&mut conn, "gary", "Nonexistent"),
            Err(CollectionError::CardNotFound)
        ));
        assert!(matches!(
            remove_ownership(&mut conn, "gary", "Pikachu"),
            Err(CollectionError::NotOwned)
        ));
    }

    #[test]
    fn list_ownership_unknown_user() {
        let conn = test_conn();
        assert!(matches!(
            list_ownership(&conn, "ghost"),
            Err(CollectionError::UserNotFound)
        ));
    }

    #[test]
    fn list_ownership_empty_after_removal() {
        let mut conn = test_conn();
        record_detection(&mut conn, "u", "Ditto", price("1.00")).unwrap();
        remove_ownership(&mut conn, "u", "Ditto").unwrap();
        assert!(list_ownership(&conn, "u").unwrap().is_empty());
    }

    #[test]
    fn deleting_user_or_card_cascades() {
        let mut conn = test_conn();
        record_detection(&mut conn, "a", "Mew", price("1.00")).unwrap();
        record_detection(&mut conn, "b", "Mew", price("1.00")).unwrap();
        record_detection(&mut conn, "b", "Mewtwo", price("1.00")).unwrap();

        assert!(delete_user(&conn, "a").unwrap());
        assert_eq!(get_ownership_count(&conn).unwrap(), 2);

        assert!(delete_card(&conn, "Mew").unwrap());
        assert_eq!(get_ownership_count(&conn).unwrap(), 1);
        assert!(!delete_card(&conn, "Mew").unwrap());
    }

    #[test]
    fn quantity_cannot_drop_below_one() {
        let mut conn = test_conn();
        let rec = record_detection(&mut conn, "u", "Abra", price("1.00")).unwrap();
        let err = conn.execute(
            "UPDATE user_cards SET quantity = 0 WHERE user_id = ?1",
            params![rec.user_id],
        );
        assert!(err.is_err());
    }

    #[test]
    fn database_sessions_share_the_file() {
        let (db, _dir) = test_db();
        let mut a = db.session().unwrap();
        record_detection(&mut a, "u", "Zubat", price("0.10")).unwrap();
        drop(a);

        let b = db.session().unwrap();
        assert_eq!(get_ownership_count(&b).unwrap(), 1);
    }

    /// Hold the write lock from a second session
    fn hold_write_lock(conn: &mut Connection) -> rusqlite::Transaction<'_> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap()
    }

    #[test]
    fn record_detection_retries_once_after_contention() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("busy.db"), Duration::from_millis(20)).unwrap();
        let mut holder_conn = db.session().unwrap();
        let mut holder = Some(hold_write_lock(&mut holder_conn));
        let mut conn = db.session().unwrap();

        let mut attempts = 0;
        let recorded = retry_once_on_contention(|| {
            attempts += 1;
            let result = record_detection_tx(&mut conn, "ash", "Pikachu", price("1.00"));
            // Release the lock after the first attempt has hit it
            holder.take();
            result
        })
        .unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(recorded.action, OwnershipAction::Added);
        assert_eq!(recorded.quantity, 1);
        assert_eq!(get_ownership_count(&conn).unwrap(), 1);
        assert_eq!(list_ownership(&conn, "ash").unwrap()[0].quantity, 1);
    }

    #[test]
    fn record_detection_gives_up_after_second_contention() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("busy.db"), Duration::from_millis(20)).unwrap();
        let mut holder_conn = db.session().unwrap();
        let holder = hold_write_lock(&mut holder_conn);
        let mut conn = db.session().unwrap();

        let err = record_detection(&mut conn, "ash", "Pikachu", price("1.00")).unwrap_err();
        assert!(is_contention(&err), "unexpected error: {}", err);

        drop(holder);
        assert_eq!(get_user_count(&conn).unwrap(), 0);
        assert_eq!(get_card_count(&conn).unwrap(), 0);
        assert_eq!(get_ownership_count(&conn).unwrap(), 0);
    }

    #[test]
    fn non_contention_errors_are_not_retried() {
        let mut attempts = 0;
        let result: DbResult<()> = retry_once_on_contention(|| {
            attempts += 1;
            Err(rusqlite::Error::InvalidQuery)
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn concurrent_detections_of_new_pair_yield_one_row() {
        let (db, _dir) = test_db();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut conn = db.session().unwrap();
                    barrier.wait();
                    record_detection(&mut conn, "racer", "Rapidash", price("5.00")).unwrap()
                })
            })
            .collect();

        let mut actions: Vec<OwnershipAction> = handles
            .into_iter()
            .map(|h| h.join().unwrap().action)
            .collect();
        actions.sort_by_key(|a| *a == OwnershipAction::Updated);

        assert_eq!(actions, vec![OwnershipAction::Added, OwnershipAction::Updated]);

        let conn = db.session().unwrap();
        assert_eq!(get_ownership_count(&conn).unwrap(), 1);
        assert_eq!(get_user_count(&conn).unwrap(), 1);
        assert_eq!(get_card_count(&conn).unwrap(), 1);
        let cards = list_ownership(&conn, "racer").unwrap();
        assert_eq!(cards[0].quantity, 2);
    }
}
