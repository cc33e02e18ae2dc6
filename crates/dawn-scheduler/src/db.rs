use rusqlite::Connection;

use crate::error::StorageResult;

/// Initialise the alarm schema in `conn`.
///
/// Creates the `alarms` table (idempotent). Device address and name are
/// either both present or both NULL.
pub fn init_db(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alarms (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            hour            INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
            minute          INTEGER NOT NULL CHECK (minute BETWEEN 0 AND 59),
            enabled         INTEGER NOT NULL DEFAULT 1,
            audio_source    TEXT,               -- opaque source reference or NULL
            device_address  TEXT,
            device_name     TEXT,
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_alarms_time ON alarms (hour, minute);
        ",
    )?;
    Ok(())
}
