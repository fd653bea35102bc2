/// PostgreSQL [`GrantRepository`]
///
/// Evaluation joins `principal_permissions → permissions → modules` and
/// ignores soft-deleted rows on all three tables as well as inactive modules.

use super::{GrantRepository, ModuleInfo, PermissionSet};
use crate::error::CoreResult;
use crate::models::Principal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgGrantRepository {
    pool: PgPool,
}

impl PgGrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Physically removes grants that were replaced before `cutoff`
    ///
    /// Live grants are never touched.
    pub async fn purge_replaced(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM public.principal_permissions
            WHERE deleted_at IS NOT NULL AND deleted_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GrantRepository for PgGrantRepository {
    async fn find_principal(&self, principal_id: Uuid) -> CoreResult<Option<Principal>> {
        Ok(Principal::find_by_id(&self.pool, principal_id).await?)
    }

    async fn count_matching_grants(
        &self,
        principal_id: Uuid,
        module: &str,
        action: &str,
    ) -> CoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM public.principal_permissions pp
            INNER JOIN public.permissions p ON p.id = pp.permission_id
            INNER JOIN public.modules m ON m.id = p.module_id
            WHERE pp.principal_id = $1
              AND m.name = $2
              AND p.action = $3
              AND pp.deleted_at IS NULL
              AND p.deleted_at IS NULL
              AND m.deleted_at IS NULL
              AND m.active = TRUE
            "#,
        )
        .bind(principal_id)
        .bind(module)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn active_modules(&self) -> CoreResult<Vec<ModuleInfo>> {
        let modules = sqlx::query_as::<_, ModuleInfo>(
            r#"
            SELECT name, display_name, sort_order
            FROM public.modules
            WHERE active = TRUE AND deleted_at IS NULL
            ORDER BY sort_order, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(modules)
    }

    async fn granted_pairs(&self, principal_id: Uuid) -> CoreResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT m.name, p.action
            FROM public.principal_permissions pp
            INNER JOIN public.permissions p ON p.id = pp.permission_id
            INNER JOIN public.modules m ON m.id = p.module_id
            WHERE pp.principal_id = $1
              AND pp.deleted_at IS NULL
              AND p.deleted_at IS NULL
              AND m.deleted_at IS NULL
              AND m.active = TRUE
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn replace_grants(
        &self,
        principal_id: Uuid,
        permissions: &PermissionSet,
        granted_by: Option<Uuid>,
    ) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE public.principal_permissions
            SET deleted_at = NOW()
            WHERE principal_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(principal_id)
        .execute(&mut *tx)
        .await?;

        let mut granted = 0u64;
        for (module, action) in permissions.granted_pairs() {
            let permission_id: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT p.id
                FROM public.permissions p
                INNER JOIN public.modules m ON m.id = p.module_id
                WHERE m.name = $1 AND p.action = $2
                  AND p.deleted_at IS NULL AND m.deleted_at IS NULL
                "#,
            )
            .bind(&module)
            .bind(&action)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(permission_id) = permission_id else {
                tracing::debug!(module = %module, action = %action, "Skipping unknown permission");
                continue;
            };

            sqlx::query(
                r#"
                INSERT INTO public.principal_permissions (id, principal_id, permission_id, granted_by)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(principal_id)
            .bind(permission_id)
            .bind(granted_by)
            .execute(&mut *tx)
            .await?;

            granted += 1;
        }

        tx.commit().await?;
        Ok(granted)
    }
}
