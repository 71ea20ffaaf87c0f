//! Sqlite-backed persistence.

use std::path::Path;

use anyhow::Context as _;
use bookclub_core::{
    Annotation, AnnotationScope, AnnotationStore, ContentId, Locator, NewAnnotation,
    PaginationTuning, Progress, ProgressStore, ReflowAnchor, Settings, Timings,
};
use rusqlite::{Connection, OptionalExtension as _, Row};
use tracing::warn;

#[derive(Debug)]
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db at {}", path.as_ref().display()))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                font_size_percent INTEGER NOT NULL,
                column_count INTEGER NOT NULL,
                column_gap_px REAL NOT NULL
            );
            INSERT OR IGNORE INTO settings (id, font_size_percent, column_count, column_gap_px)
            VALUES (1, 100, 2, 40.0);

            CREATE TABLE IF NOT EXISTS reading_progress (
                content_id TEXT PRIMARY KEY,
                current_page INTEGER NOT NULL,
                total_pages INTEGER NOT NULL,
                character_offset INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE TABLE IF NOT EXISTS annotations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                locator_kind TEXT NOT NULL,
                locator TEXT NOT NULL,
                text TEXT NOT NULL,
                color TEXT NOT NULL,
                owner TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            );
            CREATE INDEX IF NOT EXISTS annotations_by_content
                ON annotations (content_id, scope);
            "#,
        )?;

        self.add_column(
            "ALTER TABLE settings ADD COLUMN reflow_anchor TEXT NOT NULL DEFAULT 'page'",
            "add settings.reflow_anchor column",
        )?;
        self.add_column(
            "ALTER TABLE settings ADD COLUMN tuning_json TEXT NOT NULL DEFAULT '{}'",
            "add settings.tuning_json column",
        )?;
        self.add_column(
            "ALTER TABLE settings ADD COLUMN timings_json TEXT NOT NULL DEFAULT '{}'",
            "add settings.timings_json column",
        )?;
        self.add_column(
            "ALTER TABLE reading_progress ADD COLUMN location TEXT",
            "add reading_progress.location column",
        )?;
        self.add_column(
            "ALTER TABLE reading_progress ADD COLUMN percent REAL NOT NULL DEFAULT 0",
            "add reading_progress.percent column",
        )?;
        self.add_column(
            "ALTER TABLE reading_progress ADD COLUMN is_completed INTEGER NOT NULL DEFAULT 0",
            "add reading_progress.is_completed column",
        )?;

        Ok(())
    }

    fn add_column(&self, sql: &str, what: &'static str) -> anyhow::Result<()> {
        match self.conn.execute(sql, []) {
            Ok(_) => Ok(()),
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("duplicate column name") {
                    Ok(())
                } else {
                    Err(err).context(what)
                }
            }
        }
    }

    pub fn load_settings(&self) -> anyhow::Result<Settings> {
        let row = self
            .conn
            .query_row(
                "SELECT font_size_percent, column_count, column_gap_px, reflow_anchor, tuning_json, timings_json FROM settings WHERE id = 1",
                [],
                |row| {
                    let font_size_percent: i64 = row.get(0)?;
                    let column_count: i64 = row.get(1)?;
                    let column_gap_px: f64 = row.get(2)?;
                    let reflow_anchor: String = row.get(3)?;
                    let tuning_json: String = row.get(4)?;
                    let timings_json: String = row.get(5)?;
                    Ok((
                        font_size_percent,
                        column_count,
                        column_gap_px,
                        reflow_anchor,
                        tuning_json,
                        timings_json,
                    ))
                },
            )
            .optional()?;

        let Some((font_size_percent, column_count, column_gap_px, reflow_anchor, tuning_json, timings_json)) =
            row
        else {
            return Ok(Settings::default());
        };

        let defaults = Settings::default();
        let tuning: PaginationTuning = serde_json::from_str(&tuning_json).unwrap_or_else(|err| {
            warn!(error = %err, "invalid stored pagination tuning; using defaults");
            PaginationTuning::default()
        });
        let timings: Timings = serde_json::from_str(&timings_json).unwrap_or_else(|err| {
            warn!(error = %err, "invalid stored timings; using defaults");
            Timings::default()
        });

        let mut settings = Settings {
            font_size_percent: u16::try_from(font_size_percent).unwrap_or(defaults.font_size_percent),
            column_count: u16::try_from(column_count).unwrap_or(defaults.column_count),
            column_gap_px: column_gap_px as f32,
            reflow_anchor: reflow_anchor
                .parse::<ReflowAnchor>()
                .unwrap_or(ReflowAnchor::Page),
            tuning,
            timings,
        };
        settings.normalize();
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut settings = settings.clone();
        settings.normalize();
        let tuning_json = serde_json::to_string(&settings.tuning)?;
        let timings_json = serde_json::to_string(&settings.timings)?;

        self.conn.execute(
            "UPDATE settings SET font_size_percent = ?, column_count = ?, column_gap_px = ?, reflow_anchor = ?, tuning_json = ?, timings_json = ? WHERE id = 1",
            (
                settings.font_size_percent as i64,
                settings.column_count as i64,
                settings.column_gap_px as f64,
                settings.reflow_anchor.as_str(),
                tuning_json,
                timings_json,
            ),
        )?;
        Ok(())
    }

    pub fn list_progress(&self) -> anyhow::Result<std::collections::HashMap<ContentId, Progress>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id, current_page, total_pages, character_offset, location, percent, is_completed FROM reading_progress",
        )?;
        let rows = stmt.query_map([], |row| {
            let content_id: String = row.get(0)?;
            Ok((ContentId(content_id), progress_from_row(row, 1)?))
        })?;

        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (content_id, progress) = row?;
            out.insert(content_id, progress);
        }
        Ok(out)
    }

    pub fn delete_progress(&self, content_id: &ContentId) -> anyhow::Result<()> {
        self.conn.execute(
            "DELETE FROM reading_progress WHERE content_id = ?",
            [content_id.as_str()],
        )?;
        Ok(())
    }
}

fn progress_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Progress> {
    let current_page: i64 = row.get(first)?;
    let total_pages: i64 = row.get(first + 1)?;
    let character_offset: i64 = row.get(first + 2)?;
    let location: Option<String> = row.get(first + 3)?;
    let percent: f64 = row.get(first + 4)?;
    let is_completed: i64 = row.get(first + 5)?;

    let total_pages = u32::try_from(total_pages).unwrap_or(1).max(1);
    Ok(Progress {
        current_page: u32::try_from(current_page)
            .unwrap_or(1)
            .clamp(1, total_pages),
        total_pages,
        character_offset: usize::try_from(character_offset).unwrap_or(0),
        location,
        percent: percent as f32,
        is_completed: is_completed != 0,
    })
}

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<Option<Annotation>> {
    let id: i64 = row.get(0)?;
    let content_id: String = row.get(1)?;
    let scope: String = row.get(2)?;
    let locator_kind: String = row.get(3)?;
    let locator: String = row.get(4)?;

    let (Ok(scope), Some(locator)) = (
        scope.parse::<AnnotationScope>(),
        Locator::from_parts(&locator_kind, locator),
    ) else {
        warn!(id, "skipping annotation with unreadable scope or locator");
        return Ok(None);
    };

    Ok(Some(Annotation {
        id,
        content_id: ContentId(content_id),
        scope,
        locator,
        text: row.get(5)?,
        color: row.get(6)?,
        owner: row.get(7)?,
    }))
}

impl ProgressStore for Storage {
    fn load_progress(&self, content_id: &ContentId) -> anyhow::Result<Option<Progress>> {
        let progress = self
            .conn
            .query_row(
                "SELECT current_page, total_pages, character_offset, location, percent, is_completed FROM reading_progress WHERE content_id = ?",
                [content_id.as_str()],
                |row| progress_from_row(row, 0),
            )
            .optional()?;
        Ok(progress)
    }

    fn save_progress(&self, content_id: &ContentId, progress: &Progress) -> anyhow::Result<()> {
        let offset = i64::try_from(progress.character_offset).unwrap_or(i64::MAX);
        self.conn.execute(
            r#"
            INSERT INTO reading_progress
                (content_id, current_page, total_pages, character_offset, location, percent, is_completed, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, unixepoch())
            ON CONFLICT(content_id) DO UPDATE SET
                current_page = excluded.current_page,
                total_pages = excluded.total_pages,
                character_offset = excluded.character_offset,
                location = excluded.location,
                percent = excluded.percent,
                is_completed = MAX(is_completed, excluded.is_completed),
                updated_at = excluded.updated_at
            "#,
            (
                content_id.as_str(),
                progress.current_page.max(1) as i64,
                progress.total_pages.max(1) as i64,
                offset,
                progress.location.as_deref(),
                progress.percent as f64,
                progress.is_completed as i64,
            ),
        )?;
        Ok(())
    }
}

impl AnnotationStore for Storage {
    fn list_annotations(
        &self,
        content_id: &ContentId,
        scope: AnnotationScope,
    ) -> anyhow::Result<Vec<Annotation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content_id, scope, locator_kind, locator, text, color, owner FROM annotations WHERE content_id = ? AND scope = ? ORDER BY id",
        )?;
        let rows = stmt.query_map((content_id.as_str(), scope.to_string()), annotation_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(annotation) = row? {
                out.push(annotation);
            }
        }
        Ok(out)
    }

    fn create_annotation(&self, new: &NewAnnotation) -> anyhow::Result<Annotation> {
        self.conn
            .execute(
                "INSERT INTO annotations (content_id, scope, locator_kind, locator, text, color, owner) VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    new.content_id.as_str(),
                    new.scope.to_string(),
                    new.locator.kind(),
                    new.locator.value(),
                    &new.text,
                    &new.color,
                    &new.owner,
                ),
            )
            .context("insert annotation")?;
        Ok(Annotation {
            id: self.conn.last_insert_rowid(),
            content_id: new.content_id.clone(),
            scope: new.scope,
            locator: new.locator.clone(),
            text: new.text.clone(),
            color: new.color.clone(),
            owner: new.owner.clone(),
        })
    }

    fn update_annotation(&self, id: i64, text: &str, color: &str) -> anyhow::Result<()> {
        let changed = self.conn.execute(
            "UPDATE annotations SET text = ?, color = ? WHERE id = ?",
            (text, color, id),
        )?;
        if changed == 0 {
            anyhow::bail!("annotation {id} not found");
        }
        Ok(())
    }

    fn delete_annotation(&self, id: i64) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM annotations WHERE id = ?", [id])?;
        Ok(())
    }
}
