use std::collections::HashMap;

use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{CancellationPolicy, CancellationPolicyRow, NewCancellationPolicy, PolicyCondition},
    traits::LedgerStoreError,
};

#[derive(Debug, Clone, FromRow)]
struct ConditionRow {
    policy_id: i64,
    condition_type: String,
    condition_value: String,
}

impl ConditionRow {
    fn to_condition(&self) -> PolicyCondition {
        PolicyCondition::from_parts(&self.condition_type, &self.condition_value)
    }
}

async fn attach_conditions(
    rows: Vec<CancellationPolicyRow>,
    conn: &mut SqliteConnection,
) -> Result<Vec<CancellationPolicy>, sqlx::Error> {
    let conditions: Vec<ConditionRow> =
        sqlx::query_as("SELECT policy_id, condition_type, condition_value FROM policy_conditions ORDER BY id")
            .fetch_all(conn)
            .await?;
    let mut by_policy = HashMap::<i64, Vec<PolicyCondition>>::new();
    for c in &conditions {
        by_policy.entry(c.policy_id).or_default().push(c.to_condition());
    }
    let policies = rows
        .into_iter()
        .map(|row| {
            let conditions = by_policy.remove(&row.id).unwrap_or_default();
            row.with_conditions(conditions)
        })
        .collect();
    Ok(policies)
}

pub async fn fetch_active_policies(conn: &mut SqliteConnection) -> Result<Vec<CancellationPolicy>, sqlx::Error> {
    let rows: Vec<CancellationPolicyRow> =
        sqlx::query_as("SELECT * FROM cancellation_policies WHERE active = 1 ORDER BY id").fetch_all(&mut *conn).await?;
    attach_conditions(rows, conn).await
}

pub async fn fetch_policy(id: i64, conn: &mut SqliteConnection) -> Result<Option<CancellationPolicy>, sqlx::Error> {
    let row: Option<CancellationPolicyRow> =
        sqlx::query_as("SELECT * FROM cancellation_policies WHERE id = $1").bind(id).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => Ok(attach_conditions(vec![row], conn).await?.pop()),
        None => Ok(None),
    }
}

/// Inserts a policy and its conditions. Run this inside a transaction so a policy never exists without its
/// conditions.
pub async fn insert_policy(
    policy: NewCancellationPolicy,
    conn: &mut SqliteConnection,
) -> Result<CancellationPolicy, LedgerStoreError> {
    if !policy.percentages_sum_to_100() {
        return Err(LedgerStoreError::InvalidPolicy(format!(
            "Percentages for {} must sum to 100, but are {} + {} + {}",
            policy.key, policy.customer_refund_pct, policy.provider_earnings_pct, policy.platform_fee_pct
        )));
    }
    let key = policy.key.clone();
    let rows: Vec<CancellationPolicyRow> = sqlx::query_as(
        r#"
            INSERT INTO cancellation_policies (
                key,
                name,
                description,
                active,
                customer_refund_pct,
                provider_earnings_pct,
                platform_fee_pct
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(policy.key)
    .bind(policy.name)
    .bind(policy.description)
    .bind(policy.active)
    .bind(policy.customer_refund_pct)
    .bind(policy.provider_earnings_pct)
    .bind(policy.platform_fee_pct)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            LedgerStoreError::InvalidPolicy(format!("A policy with key {key} already exists"))
        },
        _ => LedgerStoreError::from(e),
    })?;
    let row = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
    for condition in &policy.conditions {
        let (kind, value) = condition.to_parts();
        sqlx::query("INSERT INTO policy_conditions (policy_id, condition_type, condition_value) VALUES ($1, $2, $3)")
            .bind(row.id)
            .bind(kind)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    debug!("🗃️ Cancellation policy {} saved with id {} and {} conditions", row.key, row.id, policy.conditions.len());
    Ok(row.with_conditions(policy.conditions))
}
