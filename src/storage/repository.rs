use rusqlite::{params, Connection, OptionalExtension};

use crate::api::types::{Contest, Dataset, Problem, Sheet, SheetProblem};

// ── Catalog ────────────────────────────────────────────────────────

/// Replace all four catalog collections in a single transaction. The old
/// rows are gone and the new rows visible atomically; a failure rolls the
/// whole replace back.
pub fn replace_catalog(conn: &mut Connection, dataset: &Dataset) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM problems", [])?;
    tx.execute("DELETE FROM contests", [])?;
    tx.execute("DELETE FROM sheets", [])?;
    tx.execute("DELETE FROM sheet_problems", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO problems (
                contest_id, idx, name, cf_rating, clist_rating, tags,
                accepted_count, attempt_count, total_users,
                till_date_accepted, problem_date, last_verdict
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for p in &dataset.problems {
            let tags = serde_json::to_string(&p.tags).unwrap_or_else(|_| "[]".into());
            stmt.execute(params![
                p.contest_id,
                p.index,
                p.name,
                p.cf_rating,
                p.clist_rating,
                tags,
                p.accepted_count,
                p.attempt_count,
                p.total_users,
                p.till_date_accepted,
                p.problem_date,
                p.last_verdict,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO contests (id, name, kind, duration_seconds, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for c in &dataset.contests {
            stmt.execute(params![c.id, c.name, c.kind, c.duration_seconds, c.start_time])?;
        }

        let mut stmt = tx.prepare("INSERT INTO sheets (id, name) VALUES (?1, ?2)")?;
        for s in &dataset.sheets {
            stmt.execute(params![s.id, s.name])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO sheet_problems (sheet_id, contest_id, idx) VALUES (?1, ?2, ?3)",
        )?;
        for sp in &dataset.sheet_problems {
            stmt.execute(params![sp.sheet_id, sp.contest_id, sp.index])?;
        }
    }

    tx.commit()
}

/// Read the four catalog collections back out of the durable store.
pub fn load_dataset(conn: &Connection) -> Result<Dataset, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT contest_id, idx, name, cf_rating, clist_rating, tags,
                accepted_count, attempt_count, total_users,
                till_date_accepted, problem_date, last_verdict
         FROM problems ORDER BY contest_id, idx",
    )?;
    let problems: Vec<Problem> = stmt
        .query_map([], |row| {
            let tags: String = row.get(5)?;
            Ok(Problem {
                contest_id: row.get(0)?,
                index: row.get(1)?,
                name: row.get(2)?,
                cf_rating: row.get(3)?,
                clist_rating: row.get(4)?,
                tags: serde_json::from_str(&tags).unwrap_or_default(),
                accepted_count: row.get(6)?,
                attempt_count: row.get(7)?,
                total_users: row.get(8)?,
                till_date_accepted: row.get(9)?,
                problem_date: row.get(10)?,
                last_verdict: row.get(11)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt =
        conn.prepare("SELECT id, name, kind, duration_seconds, start_time FROM contests ORDER BY id")?;
    let contests: Vec<Contest> = stmt
        .query_map([], |row| {
            Ok(Contest {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
                duration_seconds: row.get(3)?,
                start_time: row.get(4)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn.prepare("SELECT id, name FROM sheets ORDER BY id")?;
    let sheets: Vec<Sheet> = stmt
        .query_map([], |row| {
            Ok(Sheet {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT sheet_id, contest_id, idx FROM sheet_problems ORDER BY sheet_id, contest_id, idx")?;
    let sheet_problems: Vec<SheetProblem> = stmt
        .query_map([], |row| {
            Ok(SheetProblem {
                sheet_id: row.get(0)?,
                contest_id: row.get(1)?,
                index: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Dataset {
        problems,
        contests,
        sheets,
        sheet_problems,
    })
}

/// Write the last-known verdict for one problem key. A no-op when the
/// problem is not in the catalog.
pub fn update_problem_verdict(
    conn: &Connection,
    contest_id: i64,
    index: &str,
    verdict: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE problems SET last_verdict = ?3 WHERE contest_id = ?1 AND idx = ?2",
        params![contest_id, index, verdict],
    )?;
    Ok(())
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

// ── Cache entries ──────────────────────────────────────────────────

pub fn get_cache_entry(
    conn: &Connection,
    key: &str,
) -> Result<Option<(String, i64)>, rusqlite::Error> {
    conn.query_row(
        "SELECT data, timestamp_ms FROM cache_entries WHERE key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

pub fn set_cache_entry(
    conn: &Connection,
    key: &str,
    data: &str,
    timestamp_ms: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO cache_entries (key, data, timestamp_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
           data = excluded.data, timestamp_ms = excluded.timestamp_ms",
        params![key, data, timestamp_ms],
    )?;
    Ok(())
}

/// Delete every cache entry written at or before `cutoff_ms`. Returns the
/// number of rows removed.
pub fn delete_expired_cache(conn: &Connection, cutoff_ms: i64) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM cache_entries WHERE timestamp_ms <= ?1",
        params![cutoff_ms],
    )
}
