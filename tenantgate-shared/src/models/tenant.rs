/// Tenant model
///
/// A tenant owns one partition (PostgreSQL schema) holding its business
/// data. Tenants are never deleted; lapsed trials and subscriptions are
/// deactivated by the worker's trial expiration job.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE public.tenants (
///     id UUID PRIMARY KEY,
///     name VARCHAR(255) NOT NULL,
///     partition_name VARCHAR(63) NOT NULL UNIQUE,
///     active BOOLEAN NOT NULL DEFAULT TRUE,
///     subscription_status VARCHAR(32) NOT NULL DEFAULT 'trialing',
///     trial_ends_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use tenantgate_shared::models::tenant::{CreateTenant, Tenant};
/// use tenantgate_shared::tenancy::PartitionResolver;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let resolver = PartitionResolver::default();
/// let tenant = Tenant::create(&pool, &resolver, CreateTenant::trial("Acme Dental")).await?;
/// println!("Created tenant {} in {}", tenant.id, tenant.partition_name);
/// # Ok(())
/// # }
/// ```

use crate::error::{CoreError, CoreResult};
use crate::tenancy::{create_partition, PartitionResolver};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Default trial length for new tenants
pub const TRIAL_DAYS: i64 = 14;

/// Subscription lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trialing" => Some(SubscriptionStatus::Trialing),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

/// Tenant row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,

    pub name: String,

    /// Validated partition (schema) name
    #[serde(skip_serializing)]
    pub partition_name: String,

    /// Cleared when a trial lapses
    pub active: bool,

    pub subscription_status: String,

    pub trial_ends_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn status(&self) -> Option<SubscriptionStatus> {
        SubscriptionStatus::parse(&self.subscription_status)
    }

    /// Whether the trial has ended but the tenant has not been deactivated yet
    pub fn is_trial_expired(&self, now: DateTime<Utc>) -> bool {
        self.status() == Some(SubscriptionStatus::Trialing)
            && self.active
            && self.trial_ends_at.is_some_and(|ends| ends < now)
    }
}

/// Input for creating a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl CreateTenant {
    /// New tenant on a trial of [`TRIAL_DAYS`]
    pub fn trial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trial_ends_at: Some(Utc::now() + Duration::days(TRIAL_DAYS)),
        }
    }
}

/// Trial counters reported by the trial expiration job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TrialStats {
    /// Trials still running
    pub active: i64,
    /// Trials ending within 24 hours
    pub expiring_soon: i64,
    /// Tenants already deactivated for an expired trial
    pub expired: i64,
}

const TENANT_COLUMNS: &str = "id, name, partition_name, active, subscription_status, \
                              trial_ends_at, created_at, updated_at";

impl Tenant {
    /// Creates a tenant and its partition
    ///
    /// The partition is created first; `CREATE SCHEMA IF NOT EXISTS` makes a
    /// retry after a failed insert harmless.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the derived partition name is
    /// invalid, so no tenant is ever created on the shared partition.
    pub async fn create(
        pool: &PgPool,
        resolver: &PartitionResolver,
        data: CreateTenant,
    ) -> CoreResult<Self> {
        let id = Uuid::new_v4();
        let handle = resolver.resolve(id);
        if handle.is_fallback() {
            return Err(CoreError::Validation(format!(
                "Cannot derive a valid partition for tenant {}",
                id
            )));
        }

        create_partition(pool, handle.name()).await?;

        let sql = format!(
            "INSERT INTO public.tenants (id, name, partition_name, trial_ends_at)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            TENANT_COLUMNS
        );

        let tenant = sqlx::query_as::<_, Tenant>(&sql)
            .bind(id)
            .bind(data.name)
            .bind(handle.name().as_str())
            .bind(data.trial_ends_at)
            .fetch_one(pool)
            .await?;

        tracing::info!(tenant_id = %tenant.id, partition = %tenant.partition_name, "Tenant created");
        Ok(tenant)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {} FROM public.tenants WHERE id = $1", TENANT_COLUMNS);
        sqlx::query_as::<_, Tenant>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Deactivates every tenant whose trial ended before `now`
    ///
    /// Returns the deactivated tenant ids.
    pub async fn deactivate_expired_trials(
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE public.tenants
            SET active = FALSE, subscription_status = 'expired', updated_at = NOW()
            WHERE subscription_status = 'trialing'
              AND trial_ends_at < $1
              AND active = TRUE
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await
    }

    pub async fn trial_stats(pool: &PgPool, now: DateTime<Utc>) -> Result<TrialStats, sqlx::Error> {
        sqlx::query_as::<_, TrialStats>(
            r#"
            SELECT
                COUNT(*) FILTER (
                    WHERE subscription_status = 'trialing' AND trial_ends_at > $1 AND active
                ) AS active,
                COUNT(*) FILTER (
                    WHERE subscription_status = 'trialing' AND trial_ends_at > $1
                      AND trial_ends_at <= $1 + INTERVAL '24 hours' AND active
                ) AS expiring_soon,
                COUNT(*) FILTER (WHERE subscription_status = 'expired') AS expired
            FROM public.tenants
            "#,
        )
        .bind(now)
        .fetch_one(pool)
        .await
    }
}
