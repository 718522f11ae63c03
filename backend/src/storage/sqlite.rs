//! Sqlite-backed attendance store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use shared::{age_group_label, AgeRange};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use tracing::warn;

use super::{AttendanceRow, AttendanceStore, DateRange};

/// Attendance store over a sqlite pool.
#[derive(Clone)]
pub struct SqliteAttendanceStore {
    pool: SqlitePool,
}

impl SqliteAttendanceStore {
    /// Connect to `url`, creating the database and schema if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await?;
        }

        let pool = SqlitePool::connect(url).await?;
        Self::setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Unique in-memory database for tests, shared across the pool's
    /// connections.
    pub async fn connect_in_memory() -> Result<Self> {
        let test_id = uuid::Uuid::new_v4().to_string();
        let url = format!("file:memdb_{test_id}?mode=memory&cache=shared");
        Self::connect(&url).await
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kids (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                age INTEGER NOT NULL,
                is_visitor INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kid_id INTEGER NOT NULL REFERENCES kids(id),
                date TEXT NOT NULL,
                present INTEGER NOT NULL,
                check_in_time TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Insert a kid, returning its id. Used by seeding and tests.
    pub async fn insert_kid(&self, name: &str, age: u32, is_visitor: bool) -> Result<i64> {
        let result = sqlx::query("INSERT INTO kids (name, age, is_visitor) VALUES (?, ?, ?)")
            .bind(name)
            .bind(age)
            .bind(is_visitor)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert one attendance record for a kid.
    pub async fn insert_attendance(
        &self,
        kid_id: i64,
        date: NaiveDate,
        present: bool,
        check_in_time: Option<NaiveDateTime>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO attendance (kid_id, date, present, check_in_time) VALUES (?, ?, ?, ?)",
        )
        .bind(kid_id)
        .bind(date.format("%Y-%m-%d").to_string())
        .bind(present)
        .bind(check_in_time.map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl AttendanceStore for SqliteAttendanceStore {
    async fn count(&self, dates: &DateRange, ages: &AgeRange) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM attendance a
            JOIN kids k ON a.kid_id = k.id
            WHERE a.date BETWEEN ? AND ?
              AND k.age BETWEEN ? AND ?
            "#,
        )
        .bind(dates.start.format("%Y-%m-%d").to_string())
        .bind(dates.end.format("%Y-%m-%d").to_string())
        .bind(ages.min)
        .bind(ages.max)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }

    async fn fetch_page(
        &self,
        dates: &DateRange,
        ages: &AgeRange,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<AttendanceRow>> {
        let rows = sqlx::query(
            r#"
            SELECT a.date, k.name, k.age, a.present, a.check_in_time, k.is_visitor
            FROM attendance a
            JOIN kids k ON a.kid_id = k.id
            WHERE a.date BETWEEN ? AND ?
              AND k.age BETWEEN ? AND ?
            ORDER BY a.date, k.name, k.id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(dates.start.format("%Y-%m-%d").to_string())
        .bind(dates.end.format("%Y-%m-%d").to_string())
        .bind(ages.min)
        .bind(ages.max)
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_row).collect()
    }
}

fn map_row(row: sqlx::sqlite::SqliteRow) -> Result<AttendanceRow> {
    let raw_date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")?;

    let name: String = row.try_get("name")?;
    let age: i64 = row.try_get("age")?;
    let present: bool = row.try_get("present")?;
    let is_visitor: bool = row.try_get("is_visitor")?;

    // An unparsable timestamp degrades to no check-in (rendered as N/A)
    // rather than failing the whole export.
    let check_in_time = row
        .try_get::<Option<String>, _>("check_in_time")?
        .and_then(|raw| {
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                .map_err(|err| {
                    warn!("unparsable check_in_time {raw:?}: {err}");
                    err
                })
                .ok()
        });

    let age_group = age_group_label(age.max(0) as u32).to_string();

    Ok(AttendanceRow {
        date,
        student_name: name,
        age_group,
        present,
        check_in_time,
        is_visitor,
    })
}
