use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::spam::SpamAssessment;
use crate::web::PgPool;

#[derive(Clone)]
pub struct SpamAssessmentsRepository {
    pool: PgPool,
}

impl SpamAssessmentsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Spam columns of a pull request by its internal id
    pub async fn get_by_id(&self, pull_request_id: Uuid) -> Result<Option<SpamAssessment>> {
        use crate::schema::pull_requests::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let assessment = dsl::pull_requests
                .filter(dsl::id.eq(pull_request_id))
                .select(SpamAssessment::as_select())
                .first::<SpamAssessment>(&mut conn)
                .optional()?;

            Ok::<Option<SpamAssessment>, anyhow::Error>(assessment)
        })
        .await??;

        Ok(result)
    }

    /// Spam columns of a pull request by its GitHub id
    pub async fn get_by_github_id(&self, github_id: i64) -> Result<Option<SpamAssessment>> {
        use crate::schema::pull_requests::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let assessment = dsl::pull_requests
                .filter(dsl::github_id.eq(github_id))
                .select(SpamAssessment::as_select())
                .first::<SpamAssessment>(&mut conn)
                .optional()?;

            Ok::<Option<SpamAssessment>, anyhow::Error>(assessment)
        })
        .await??;

        Ok(result)
    }

    /// Most recently created pull requests, newest first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<SpamAssessment>> {
        use crate::schema::pull_requests::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let assessments = dsl::pull_requests
                .order(dsl::created_at.desc())
                .limit(limit)
                .select(SpamAssessment::as_select())
                .load::<SpamAssessment>(&mut conn)?;

            Ok::<Vec<SpamAssessment>, anyhow::Error>(assessments)
        })
        .await??;

        Ok(result)
    }
}
