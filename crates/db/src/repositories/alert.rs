use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;

use renobudget_core::domain::alert::{AlertChange, AlertSeverity, BudgetAlert};
use renobudget_core::domain::category::CategoryId;
use renobudget_core::domain::project::ProjectId;
use renobudget_core::domain::purchase::Purchase;
use renobudget_core::store::{BudgetStore, CategoryLoad, StoreError};

use super::project::{row_to_category, CATEGORY_COLUMNS};
use super::purchase::{row_to_purchase, PURCHASE_COLUMNS};
use super::{decimal, optional_decimal, text, timestamp, RepositoryError, SqlStore};

fn row_to_alert(row: &SqliteRow) -> Result<BudgetAlert, RepositoryError> {
    let severity_raw = text(row, "alert_type")?;
    let severity = AlertSeverity::parse(&severity_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown alert type `{severity_raw}`"))
    })?;

    Ok(BudgetAlert {
        category_id: CategoryId(text(row, "category_id")?),
        category_name: text(row, "category_name")?,
        project_id: ProjectId(text(row, "project_id")?),
        severity,
        current_percentage: optional_decimal(row, "current_percentage")?,
        threshold_percentage: decimal(row, "threshold_percentage")?,
        budgeted_amount: decimal(row, "budgeted_amount")?,
        spent_amount: decimal(row, "spent_amount")?,
        message: text(row, "message")?,
        evaluated_at: timestamp(row, "updated_at")?,
    })
}

impl SqlStore {
    async fn project_exists(&self, project_id: &ProjectId) -> Result<bool, RepositoryError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM project WHERE id = ?")
            .bind(&project_id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(found.is_some())
    }

    async fn purchases_in(&self, category_id: &CategoryId) -> Result<Vec<Purchase>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchase WHERE category_id = ? ORDER BY created_at, id"
        ))
        .bind(&category_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_purchase).collect()
    }

    async fn write_alert(&self, alert: &BudgetAlert) -> Result<AlertChange, RepositoryError> {
        let mut tx = self.pool().begin().await?;

        let live: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT alert_type, notified_at FROM budget_alert
             WHERE category_id = ? AND is_active = 1 LIMIT 1",
        )
        .bind(&alert.category_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE budget_alert SET is_active = 0, updated_at = ?
             WHERE category_id = ? AND alert_type <> ? AND is_active = 1",
        )
        .bind(&now)
        .bind(&alert.category_id.0)
        .bind(alert.severity.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO budget_alert (category_id, alert_type, project_id, category_name,
                                       current_percentage, threshold_percentage, budgeted_amount,
                                       spent_amount, message, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(category_id, alert_type) DO UPDATE SET
                category_name = excluded.category_name,
                current_percentage = excluded.current_percentage,
                threshold_percentage = excluded.threshold_percentage,
                budgeted_amount = excluded.budgeted_amount,
                spent_amount = excluded.spent_amount,
                message = excluded.message,
                notified_at = CASE WHEN budget_alert.is_active = 1 THEN budget_alert.notified_at END,
                is_active = 1,
                updated_at = excluded.updated_at",
        )
        .bind(&alert.category_id.0)
        .bind(alert.severity.as_str())
        .bind(&alert.project_id.0)
        .bind(&alert.category_name)
        .bind(alert.current_percentage.map(|value| value.to_string()))
        .bind(alert.threshold_percentage.to_string())
        .bind(alert.budgeted_amount.to_string())
        .bind(alert.spent_amount.to_string())
        .bind(&alert.message)
        .bind(alert.evaluated_at.to_rfc3339())
        .bind(alert.evaluated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let Some((raw, notified_at)) = live else {
            return Ok(AlertChange::Raised);
        };
        let previous = AlertSeverity::parse(&raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown alert type `{raw}`")))?;

        Ok(if previous != alert.severity {
            AlertChange::Changed { previous }
        } else if notified_at.is_some() {
            AlertChange::Unchanged
        } else {
            AlertChange::Unnotified
        })
    }
}

#[async_trait]
impl BudgetStore for SqlStore {
    async fn get_categories_with_purchases(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<CategoryLoad>, StoreError> {
        if !self.project_exists(project_id).await? {
            return Err(StoreError::not_found("project", &project_id.0));
        }

        let rows = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM budget_category
             WHERE project_id = ? AND is_active = 1
             ORDER BY name, id"
        ))
        .bind(&project_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        let mut loaded = Vec::with_capacity(rows.len());
        for row in &rows {
            let category = match row_to_category(row) {
                Ok(category) => category,
                Err(error) => {
                    // Identify the row by its key columns so the failure is reported against it.
                    loaded.push(CategoryLoad::Unreadable {
                        category_id: CategoryId(text(row, "id")?),
                        category_name: text(row, "name").unwrap_or_default(),
                        error: error.into(),
                    });
                    continue;
                }
            };
            loaded.push(match self.purchases_in(&category.id).await {
                Ok(purchases) => CategoryLoad::Loaded { category, purchases },
                Err(error) => CategoryLoad::unreadable(&category, error.into()),
            });
        }
        Ok(loaded)
    }

    async fn upsert_alert(&self, alert: &BudgetAlert) -> Result<AlertChange, StoreError> {
        Ok(self.write_alert(alert).await?)
    }

    async fn mark_alert_notified(
        &self,
        category_id: &CategoryId,
        severity: AlertSeverity,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE budget_alert SET notified_at = ?, updated_at = ?
             WHERE category_id = ? AND alert_type = ? AND is_active = 1",
        )
        .bind(&now)
        .bind(&now)
        .bind(&category_id.0)
        .bind(severity.as_str())
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("budget alert", &category_id.0));
        }
        Ok(())
    }

    async fn clear_alerts(&self, category_id: &CategoryId) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE budget_alert SET is_active = 0, updated_at = ?
             WHERE category_id = ? AND is_active = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&category_id.0)
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_live_alerts(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<BudgetAlert>, StoreError> {
        let rows = sqlx::query(
            "SELECT category_id, alert_type, project_id, category_name, current_percentage,
                    threshold_percentage, budgeted_amount, spent_amount, message, updated_at
             FROM budget_alert
             WHERE project_id = ? AND is_active = 1
             ORDER BY category_name, category_id",
        )
        .bind(&project_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_alert).collect::<Result<Vec<_>, _>>()?)
    }

    async fn refresh_spent_amount(
        &self,
        category_id: &CategoryId,
        spent: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE budget_category SET spent_amount = ?, updated_at = ? WHERE id = ?",
        )
        .bind(spent.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(&category_id.0)
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("budget category", &category_id.0));
        }
        Ok(())
    }
}
