use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;

/// Durable sink for delivered messages and their conversation grouping.
///
/// Persistence is an auxiliary durability concern: the router logs a failure
/// and delivers anyway, so implementations never gate delivery.
pub trait MessageStore: Send + Sync {
    fn record_message(
        &self,
        conversation_key: &str,
        sender_id: &str,
        receiver_id: &str,
        ciphertext: &str,
        iv: &str,
    ) -> Result<(), String>;
}

/// Deterministic key for the direct conversation between two users.
/// Both participants derive the same key regardless of who messages first.
pub fn conversation_key(user_id_1: &str, user_id_2: &str) -> String {
    let mut ids = [user_id_1, user_id_2];
    ids.sort();
    let joined = format!("conv_{}_{}", ids[0], ids[1]);

    let mut hasher = DefaultHasher::new();
    joined.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// SQLite-backed message store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), String> {
        conn.execute_batch(
            "
            -- Direct conversations, keyed by the unordered pair of user ids
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_a TEXT NOT NULL,
                user_b TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Delivered messages (ciphertext, the relay never decrypts)
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                iv TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| e.to_string())
    }

    #[cfg(test)]
    fn conversation_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap() as usize
    }

    #[cfg(test)]
    fn message_count(&self, conversation_key: &str) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_key],
            |row| row.get::<_, i64>(0),
        )
        .unwrap() as usize
    }
}

impl MessageStore for SqliteStore {
    fn record_message(
        &self,
        conversation_key: &str,
        sender_id: &str,
        receiver_id: &str,
        ciphertext: &str,
        iv: &str,
    ) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        let now = Utc::now().to_rfc3339();

        // Lazily create the conversation row. The key is a deterministic
        // function of the user pair and the table's primary key, so racing
        // first messages collapse into one row.
        let mut pair = [sender_id, receiver_id];
        pair.sort();
        conn.execute(
            "INSERT OR IGNORE INTO conversations(id, user_a, user_b, created_at)
             VALUES(?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_key, pair[0], pair[1], now],
        )
        .map_err(|e| e.to_string())?;

        conn.execute(
            "INSERT INTO messages(conversation_id, sender, receiver, ciphertext, iv, timestamp)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![conversation_key, sender_id, receiver_id, ciphertext, iv, now],
        )
        .map_err(|e| e.to_string())?;

        Ok(())
    }
}
