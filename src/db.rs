// 🗄️ Student Store - CSV import into SQLite + audit events
// The detection core only reads Student values; everything here is the
// caller-side record source.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::normalize::{normalize_cpf, normalize_email, normalize_phone, normalize_text};

// ============================================================================
// STUDENT RECORD
// ============================================================================

/// A student/lead record as consumed by duplicate detection.
///
/// Only `id` is required; all identity fields are optional free text exactly
/// as entered in the CRM. Detection never mutates a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    /// Stable identity (UUID) - assigned on import when the CSV has none
    #[serde(default = "default_uuid")]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    /// Brazilian tax id, 11 digits when unformatted
    #[serde(default)]
    pub cpf: Option<String>,

    // ========================================================================
    // IMPORT BOOKKEEPING
    // ========================================================================
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,

    #[serde(default)]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_file: String,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Student {
    /// Compute idempotency hash over the normalized identity fields.
    ///
    /// Re-importing the same row (even with different formatting) hits the
    /// UNIQUE constraint and is skipped. This is for import dedup only;
    /// fuzzy duplicate detection is a separate concern.
    pub fn compute_import_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            normalize_text(self.name.as_deref()),
            normalize_email(self.email.as_deref()),
            normalize_phone(self.phone.as_deref()),
            normalize_cpf(self.cpf.as_deref()),
        ));
        format!("{:x}", hasher.finalize())
    }

    /// Fill in id and import timestamp for a freshly loaded row
    pub fn init_import_fields(&mut self, source_file: &str) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        if self.imported_at.is_none() {
            self.imported_at = Some(Utc::now());
        }
        if self.source_file.is_empty() {
            self.source_file = source_file.to_string();
        }
    }

    /// Display name for reports: name, else email, else the id
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref() {
            if !name.trim().is_empty() {
                return name;
            }
        }
        if let Some(email) = self.email.as_deref() {
            if !email.trim().is_empty() {
                return email;
            }
        }
        &self.id
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Append-only audit trail entry (imports and duplicate scans)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// DATABASE
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            rowid_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            import_hash TEXT UNIQUE NOT NULL,
            student_id TEXT UNIQUE NOT NULL,
            name TEXT,
            email TEXT,
            phone TEXT,
            cpf TEXT,
            imported_at TEXT,
            source_file TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_cpf ON students(cpf)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type, timestamp)",
        [],
    )?;

    Ok(())
}

/// Load students from a CSV file with headers id,name,email,phone,cpf
/// (id may be blank; a UUID is assigned on load)
pub fn load_csv(csv_path: &Path) -> Result<Vec<Student>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let source_file = csv_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut students = Vec::new();

    for result in rdr.deserialize() {
        let mut student: Student = result.context("Failed to deserialize student row")?;
        student.init_import_fields(&source_file);
        students.push(student);
    }

    Ok(students)
}

/// Insert students, skipping rows whose import hash already exists.
/// Returns the number actually inserted.
pub fn insert_students(conn: &Connection, students: &[Student]) -> Result<usize> {
    let mut inserted = 0;
    let mut skipped = 0;

    for student in students {
        let hash = student.compute_import_hash();
        let imported_at = student.imported_at.map(|dt| dt.to_rfc3339());

        let result = conn.execute(
            "INSERT INTO students (
                import_hash, student_id, name, email, phone, cpf,
                imported_at, source_file
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                hash,
                student.id,
                student.name,
                student.email,
                student.phone,
                student.cpf,
                imported_at,
                student.source_file,
            ],
        );

        match result {
            Ok(_) => {
                inserted += 1;

                let event = Event::new(
                    "student_imported",
                    serde_json::json!({
                        "student_id": student.id,
                        "source_file": student.source_file,
                    }),
                    "csv_importer",
                );
                let _ = insert_event(conn, &event);
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("✓ Inserted: {} students", inserted);
    println!("✓ Skipped duplicates: {}", skipped);

    Ok(inserted)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Most recent audit events of one type, newest first
pub fn get_recent_events(conn: &Connection, event_type: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY timestamp DESC
         LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![event_type, limit as i64], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(3)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn get_all_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, name, email, phone, cpf, imported_at, source_file
         FROM students
         ORDER BY rowid_pk",
    )?;

    let students = stmt
        .query_map([], |row| {
            let imported_at_str: Option<String> = row.get(5)?;
            let imported_at = imported_at_str
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Ok(Student {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
                cpf: row.get(4)?,
                imported_at,
                source_file: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, name: &str, email: &str, phone: &str, cpf: &str) -> Student {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        Student {
            id: id.to_string(),
            name: opt(name),
            email: opt(email),
            phone: opt(phone),
            cpf: opt(cpf),
            imported_at: None,
            source_file: String::new(),
        }
    }

    #[test]
    fn test_import_hash_ignores_formatting() {
        let a = student(
            "1",
            "Maria Silva",
            "m@x.com",
            "+55 (11) 99999-8888",
            "123.456.789-01",
        );
        let b = student("2", "  maria   SILVA ", " M@X.COM ", "5511999998888", "12345678901");

        assert_eq!(a.compute_import_hash(), b.compute_import_hash());
    }

    #[test]
    fn test_import_hash_differs_on_content() {
        let a = student("1", "Maria Silva", "m@x.com", "", "");
        let b = student("2", "Maria Souza", "m@x.com", "", "");

        assert_ne!(a.compute_import_hash(), b.compute_import_hash());
    }

    #[test]
    fn test_init_import_fields() {
        let mut s = student("", "Maria", "", "", "");
        s.init_import_fields("leads.csv");

        assert!(!s.id.is_empty());
        assert!(s.imported_at.is_some());
        assert_eq!(s.source_file, "leads.csv");
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(student("1", "Maria", "m@x.com", "", "").display_name(), "Maria");
        assert_eq!(student("1", "", "m@x.com", "", "").display_name(), "m@x.com");
        assert_eq!(student("id-7", "", "", "", "").display_name(), "id-7");
    }

    #[test]
    fn test_insert_and_load_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut a = student("", "Maria Silva", "maria@x.com", "11 99999-8888", "");
        a.init_import_fields("leads.csv");
        let mut b = student("", "João Pedro", "", "", "123.456.789-01");
        b.init_import_fields("leads.csv");

        let inserted = insert_students(&conn, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(verify_count(&conn).unwrap(), 2);

        let loaded = get_all_students(&conn).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, a.id);
        assert_eq!(loaded[0].name.as_deref(), Some("Maria Silva"));
        assert_eq!(loaded[1].cpf.as_deref(), Some("123.456.789-01"));
    }

    #[test]
    fn test_reimport_is_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut a = student("", "Maria Silva", "maria@x.com", "", "");
        a.init_import_fields("leads.csv");

        assert_eq!(insert_students(&conn, &[a]).unwrap(), 1);

        // Same identity fields, formatted differently, fresh UUID
        let mut again = student("", " MARIA  silva ", "Maria@X.com", "", "");
        again.init_import_fields("leads_v2.csv");

        assert_eq!(insert_students(&conn, &[again]).unwrap(), 0);
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_scan_events_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "duplicate_scan",
            serde_json::json!({ "total_groups": 3 }),
            "cli",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_recent_events(&conn, "duplicate_scan", 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["total_groups"], 3);
        assert_eq!(events[0].actor, "cli");
    }
}
