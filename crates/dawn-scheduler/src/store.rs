use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use dawn_core::{Alarm, AlarmId, AudioSourceRef, DeviceRef, NewAlarm};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::{
    db::init_db,
    error::{StorageError, StorageResult},
};

/// Durable record of alarms.
pub trait AlarmStore: Send + Sync {
    /// All alarms, ordered by time of day.
    fn get_all(&self) -> StorageResult<Vec<Alarm>>;
    fn get_enabled(&self) -> StorageResult<Vec<Alarm>>;
    fn get_by_id(&self, id: AlarmId) -> StorageResult<Option<Alarm>>;
    /// Persist a new alarm and return it with its assigned id.
    fn insert(&self, alarm: NewAlarm) -> StorageResult<Alarm>;
    fn update(&self, alarm: &Alarm) -> StorageResult<()>;
    fn delete(&self, id: AlarmId) -> StorageResult<()>;
    fn set_enabled(&self, id: AlarmId, enabled: bool) -> StorageResult<()>;
    /// Live view of [`AlarmStore::get_all`], re-published after every mutation.
    fn watch(&self) -> watch::Receiver<Vec<Alarm>>;
}

const SELECT_ALARM: &str = "SELECT id, hour, minute, enabled, audio_source,
                                   device_address, device_name, created_at
                            FROM alarms";

/// SQLite-backed [`AlarmStore`].
pub struct SqliteAlarmStore {
    conn: Mutex<Connection>,
    changes: watch::Sender<Vec<Alarm>>,
}

impl SqliteAlarmStore {
    pub fn new(conn: Connection) -> StorageResult<Self> {
        init_db(&conn)?;
        let initial = query_alarms(&conn, "ORDER BY hour, minute, id")?;
        let (changes, _) = watch::channel(initial);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Corrupt("alarm store lock poisoned".to_string()))
    }

    fn publish(&self) -> StorageResult<()> {
        let all = self.get_all()?;
        self.changes.send_replace(all);
        Ok(())
    }
}

impl AlarmStore for SqliteAlarmStore {
    fn get_all(&self) -> StorageResult<Vec<Alarm>> {
        let conn = self.conn()?;
        query_alarms(&conn, "ORDER BY hour, minute, id")
    }

    fn get_enabled(&self) -> StorageResult<Vec<Alarm>> {
        let conn = self.conn()?;
        query_alarms(&conn, "WHERE enabled = 1 ORDER BY hour, minute, id")
    }

    fn get_by_id(&self, id: AlarmId) -> StorageResult<Option<Alarm>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{SELECT_ALARM} WHERE id = ?1"),
                [id.get()],
                read_row,
            )
            .optional()?;
        row.map(into_alarm).transpose()
    }

    #[instrument(skip(self, alarm), fields(time = %format!("{:02}:{:02}", alarm.hour, alarm.minute)))]
    fn insert(&self, alarm: NewAlarm) -> StorageResult<Alarm> {
        let created_at = Utc::now().to_rfc3339();
        let stored = {
            let conn = self.conn()?;
            let (address, name) = split_device(alarm.device.as_ref());
            conn.execute(
                "INSERT INTO alarms
                 (hour, minute, enabled, audio_source, device_address, device_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    alarm.hour,
                    alarm.minute,
                    alarm.enabled,
                    alarm.audio_source.as_ref().map(AudioSourceRef::as_str),
                    address,
                    name,
                    created_at,
                ],
            )?;
            let id = AlarmId(conn.last_insert_rowid());
            alarm.into_alarm(id, created_at)
        };
        info!(alarm_id = %stored.id, "alarm inserted");
        self.publish()?;
        Ok(stored)
    }

    #[instrument(skip(self, alarm), fields(alarm_id = %alarm.id))]
    fn update(&self, alarm: &Alarm) -> StorageResult<()> {
        alarm.validate()?;
        {
            let conn = self.conn()?;
            let (address, name) = split_device(alarm.device.as_ref());
            let n = conn.execute(
                "UPDATE alarms
                 SET hour = ?2, minute = ?3, enabled = ?4, audio_source = ?5,
                     device_address = ?6, device_name = ?7
                 WHERE id = ?1",
                params![
                    alarm.id.get(),
                    alarm.hour,
                    alarm.minute,
                    alarm.enabled,
                    alarm.audio_source.as_ref().map(AudioSourceRef::as_str),
                    address,
                    name,
                ],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound { id: alarm.id });
            }
        }
        info!("alarm updated");
        self.publish()
    }

    #[instrument(skip(self))]
    fn delete(&self, id: AlarmId) -> StorageResult<()> {
        {
            let conn = self.conn()?;
            let n = conn.execute("DELETE FROM alarms WHERE id = ?1", [id.get()])?;
            if n == 0 {
                return Err(StorageError::NotFound { id });
            }
        }
        info!(alarm_id = %id, "alarm deleted");
        self.publish()
    }

    #[instrument(skip(self))]
    fn set_enabled(&self, id: AlarmId, enabled: bool) -> StorageResult<()> {
        {
            let conn = self.conn()?;
            let n = conn.execute(
                "UPDATE alarms SET enabled = ?2 WHERE id = ?1",
                params![id.get(), enabled],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound { id });
            }
        }
        info!(alarm_id = %id, enabled, "alarm toggled");
        self.publish()
    }

    fn watch(&self) -> watch::Receiver<Vec<Alarm>> {
        self.changes.subscribe()
    }
}

type AlarmRow = (
    i64,
    i64,
    i64,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<AlarmRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_alarm(row: AlarmRow) -> StorageResult<Alarm> {
    let (id, hour, minute, enabled, audio_source, address, name, created_at) = row;
    let hour = u8::try_from(hour).map_err(|_| StorageError::Corrupt(format!("hour {hour}")))?;
    let minute =
        u8::try_from(minute).map_err(|_| StorageError::Corrupt(format!("minute {minute}")))?;

    let mut alarm = Alarm::new(AlarmId(id), hour, minute)?.with_enabled(enabled);
    alarm.created_at = created_at;
    if let Some(source) = audio_source {
        alarm = alarm.with_audio_source(AudioSourceRef::new(source));
    }
    if let Some(address) = address {
        alarm = alarm.with_device(DeviceRef::new(address, name.unwrap_or_default()));
    }
    Ok(alarm)
}

fn query_alarms(conn: &Connection, tail: &str) -> StorageResult<Vec<Alarm>> {
    let mut stmt = conn.prepare(&format!("{SELECT_ALARM} {tail}"))?;
    let rows = stmt
        .query_map([], read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_alarm).collect()
}

fn split_device(device: Option<&DeviceRef>) -> (Option<&str>, Option<&str>) {
    match device {
        Some(d) => (Some(d.address.as_str()), Some(d.display_name.as_str())),
        None => (None, None),
    }
}
