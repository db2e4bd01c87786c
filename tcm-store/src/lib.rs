//! SQLite-backed result store for Test Case Manager.
//!
//! Durable record of submitted-file outcomes, per-case details, a flat
//! key/value settings table, and a connection log. Every write is a
//! single-statement transaction, so a crash mid-batch loses at most the
//! in-flight job's row.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tcm_common::{CaseResult, OutcomeRecord, OutcomeSink};
use tracing::debug;

mod schema;

/// One row of the submitted-file history.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: i64,
    pub file_name: String,
    pub file_size: u64,
    pub test_count: usize,
    pub send_status: String,
    pub overall_result: String,
    pub affects_wan: bool,
    pub affects_lan: bool,
    pub execution_time: f64,
    pub target_ip: String,
    pub target_username: String,
    pub timestamp: String,
}

/// File-backed relational store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("failed to configure SQLite")?;
        conn.execute_batch(schema::SCHEMA)
            .context("failed to initialize schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .with_context(|| format!("failed to save setting {key}"))?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str, default: &str) -> String {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .ok()
        .flatten()
        .unwrap_or_else(|| default.to_string())
    }

    // ── Connection log ───────────────────────────────────────────────

    pub fn log_connection(&self, ip_address: &str, status: &str, details: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO connection_log (ip_address, status, details) VALUES (?1, ?2, ?3)",
            params![ip_address, status, details],
        )
        .context("failed to log connection attempt")?;
        Ok(())
    }

    // ── Results ──────────────────────────────────────────────────────

    /// Persist a submitted-file outcome, returning its row id.
    pub fn save_file_result(&self, record: &OutcomeRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO test_results (
                file_name, file_size, test_count, send_status, overall_result,
                affects_wan, affects_lan, execution_time, target_ip, target_username
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.file_name,
                record.file_size as i64,
                record.test_count as i64,
                record.send_status,
                record.overall_result,
                record.affects_wan,
                record.affects_lan,
                record.execution_time,
                record.target_host,
                record.target_user,
            ],
        )
        .context("failed to save test result")?;
        let id = conn.last_insert_rowid();
        debug!("Saved result row {id} for {}", record.file_name);
        Ok(id)
    }

    /// Persist per-case rows for a saved result.
    pub fn save_case_results(&self, result_id: i64, cases: &[CaseResult]) -> Result<()> {
        if cases.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        for case in cases {
            conn.execute(
                "INSERT INTO test_cases (
                    result_id, service, action, status, details, execution_time
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    result_id,
                    case.service,
                    case.action,
                    case.status,
                    case.details,
                    case.execution_time,
                ],
            )
            .context("failed to save test case result")?;
        }
        Ok(())
    }

    /// Most recent history rows, newest first.
    pub fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, file_name, file_size, test_count, send_status, overall_result,
                    affects_wan, affects_lan, execution_time, target_ip, target_username,
                    timestamp
             FROM test_results ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(HistoryRow {
                    id: row.get(0)?,
                    file_name: row.get(1)?,
                    file_size: row.get::<_, i64>(2)? as u64,
                    test_count: row.get::<_, i64>(3)? as usize,
                    send_status: row.get(4)?,
                    overall_result: row.get(5)?,
                    affects_wan: row.get(6)?,
                    affects_lan: row.get(7)?,
                    execution_time: row.get(8)?,
                    target_ip: row.get(9)?,
                    target_username: row.get(10)?,
                    timestamp: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Case details for a file, in insertion order.
    pub fn test_details(&self, file_name: &str) -> Result<Vec<CaseResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tc.service, tc.action, tc.status, tc.details, tc.execution_time
             FROM test_cases tc
             JOIN test_results tr ON tc.result_id = tr.id
             WHERE tr.file_name = ?1
             ORDER BY tc.id",
        )?;
        let rows = stmt
            .query_map(params![file_name], |row| {
                Ok(CaseResult {
                    service: row.get(0)?,
                    action: row.get(1)?,
                    status: row.get(2)?,
                    details: row.get(3)?,
                    execution_time: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Wipe the history tables. Settings survive.
    pub fn clear_history(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM test_cases", [])?;
        conn.execute("DELETE FROM test_results", [])?;
        Ok(())
    }
}

impl OutcomeSink for Database {
    fn save_file_result(&self, record: &OutcomeRecord) -> Result<i64> {
        Database::save_file_result(self, record)
    }

    fn save_case_results(&self, result_id: i64, cases: &[CaseResult]) -> Result<()> {
        Database::save_case_results(self, result_id, cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(file_name: &str, overall: &str) -> OutcomeRecord {
        OutcomeRecord {
            file_name: file_name.to_string(),
            file_size: 256,
            test_count: 2,
            send_status: "Complete".to_string(),
            overall_result: overall.to_string(),
            affects_wan: false,
            affects_lan: true,
            execution_time: 12.5,
            target_host: "192.168.88.1".to_string(),
            target_user: "root".to_string(),
        }
    }

    fn case(service: &str, status: &str) -> CaseResult {
        CaseResult {
            service: service.to_string(),
            action: "check".to_string(),
            status: status.to_string(),
            details: format!("{service} checked"),
            execution_time: 1.25,
        }
    }

    #[test]
    fn test_roundtrip_result_and_cases() {
        let db = Database::open_in_memory().unwrap();
        let id = db.save_file_result(&record("lan_dhcp.json", "Pass")).unwrap();
        db.save_case_results(id, &[case("lan", "pass"), case("dhcp", "fail")])
            .unwrap();

        let details = db.test_details("lan_dhcp.json").unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].service, "lan");
        assert_eq!(details[1].status, "fail");
        assert_eq!(details[0].execution_time, 1.25);
    }

    #[test]
    fn test_recent_history_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.save_file_result(&record("first.json", "Pass")).unwrap();
        db.save_file_result(&record("second.json", "Fail")).unwrap();

        let history = db.recent_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].file_name, "second.json");
        assert_eq!(history[0].overall_result, "Fail");
        assert!(history[0].affects_lan);
        assert!(!history[0].affects_wan);

        let limited = db.recent_history(1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_settings_upsert() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("lan_ip", "192.168.88.1"), "192.168.88.1");

        db.set_setting("lan_ip", "10.0.0.5").unwrap();
        db.set_setting("lan_ip", "10.0.0.9").unwrap();
        assert_eq!(db.get_setting("lan_ip", "192.168.88.1"), "10.0.0.9");
    }

    #[test]
    fn test_clear_history_keeps_settings() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("username", "root").unwrap();
        let id = db.save_file_result(&record("gone.json", "Pass")).unwrap();
        db.save_case_results(id, &[case("lan", "pass")]).unwrap();

        db.clear_history().unwrap();
        assert!(db.recent_history(10).unwrap().is_empty());
        assert!(db.test_details("gone.json").unwrap().is_empty());
        assert_eq!(db.get_setting("username", ""), "root");
    }

    #[test]
    fn test_connection_log_insert() {
        let db = Database::open_in_memory().unwrap();
        db.log_connection("192.168.88.1", "connected", "canary ok")
            .unwrap();
        let count: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM connection_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let db = Database::open(&path).unwrap();
        db.save_file_result(&record("a.json", "Pass")).unwrap();
        assert!(path.exists());
    }
}
