use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use relay_core::domain::interview::{Interview, InterviewId, WizardId};

use super::{decode_json, encode_json, InterviewRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInterviewRepository {
    pool: DbPool,
}

impl SqlInterviewRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InterviewRepository for SqlInterviewRepository {
    async fn find(&self, id: &InterviewId) -> Result<Option<Interview>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, wizard_id, collected, remaining, greeted, complete, created_at, updated_at \
             FROM interviews WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(interview_from_row).transpose()
    }

    async fn save(&self, interview: Interview) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO interviews (id, wizard_id, collected, remaining, greeted, complete, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 wizard_id = excluded.wizard_id, collected = excluded.collected, \
                 remaining = excluded.remaining, greeted = excluded.greeted, \
                 complete = excluded.complete, updated_at = excluded.updated_at",
        )
        .bind(&interview.id.0)
        .bind(&interview.wizard_id.0)
        .bind(encode_json(&interview.collected)?)
        .bind(encode_json(&interview.remaining)?)
        .bind(interview.greeted)
        .bind(interview.complete)
        .bind(interview.created_at)
        .bind(interview.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn interview_from_row(row: &SqliteRow) -> Result<Interview, RepositoryError> {
    Ok(Interview {
        id: InterviewId(row.get("id")),
        wizard_id: WizardId(row.get("wizard_id")),
        collected: decode_json("collected", &row.get::<String, _>("collected"))?,
        remaining: decode_json("remaining", &row.get::<String, _>("remaining"))?,
        greeted: row.get("greeted"),
        complete: row.get("complete"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
