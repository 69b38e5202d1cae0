use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use renobudget_core::domain::approval::{ApprovalAction, ApprovalId, PurchaseApproval};
use renobudget_core::domain::category::CategoryId;
use renobudget_core::domain::project::ProjectId;
use renobudget_core::domain::purchase::{
    Purchase, PurchaseId, PurchasePriority, PurchaseStatus, StatusUpdate,
};
use renobudget_core::domain::rule::ApprovalRule;
use renobudget_core::domain::UserId;
use renobudget_core::store::{PurchaseStore, StoreError};

use super::{decimal, optional_text, optional_timestamp, text, timestamp, RepositoryError, SqlStore};

pub(crate) const PURCHASE_COLUMNS: &str = "id, project_id, category_id, description, supplier,
    amount, purchase_date, requested_by, status, approved_by, approved_at, rejection_reason,
    priority, created_at, updated_at";

pub(crate) fn row_to_purchase(row: &SqliteRow) -> Result<Purchase, RepositoryError> {
    let status_raw = text(row, "status")?;
    let status = PurchaseStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown purchase status `{status_raw}`"))
    })?;

    let priority = match optional_text(row, "priority")? {
        Some(raw) if !raw.trim().is_empty() => PurchasePriority::parse(&raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown purchase priority `{raw}`"))
        })?,
        _ => PurchasePriority::default(),
    };

    let date_raw = text(row, "purchase_date")?;
    let purchase_date = NaiveDate::parse_from_str(date_raw.get(..10).unwrap_or(&date_raw), "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("purchase_date `{date_raw}`: {e}")))?;

    Ok(Purchase {
        id: PurchaseId(text(row, "id")?),
        project_id: ProjectId(text(row, "project_id")?),
        category_id: CategoryId(text(row, "category_id")?),
        description: text(row, "description")?,
        supplier: optional_text(row, "supplier")?,
        amount: decimal(row, "amount")?,
        purchase_date,
        requested_by: UserId(text(row, "requested_by")?),
        status,
        approved_by: optional_text(row, "approved_by")?.map(UserId),
        approved_at: optional_timestamp(row, "approved_at")?,
        rejection_reason: optional_text(row, "rejection_reason")?,
        priority,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_approval(row: &SqliteRow) -> Result<PurchaseApproval, RepositoryError> {
    let action_raw = text(row, "action")?;
    let action = ApprovalAction::parse(&action_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval action `{action_raw}`"))
    })?;

    Ok(PurchaseApproval {
        id: ApprovalId(text(row, "id")?),
        purchase_id: PurchaseId(text(row, "purchase_id")?),
        approver_id: optional_text(row, "approver_id")?.map(UserId),
        action,
        comments: optional_text(row, "comments")?,
        created_at: timestamp(row, "created_at")?,
    })
}

/// Status values a stored row may carry for `expected`, including legacy spellings.
fn stored_spellings(expected: PurchaseStatus) -> &'static [&'static str] {
    match expected {
        PurchaseStatus::Pending => &["pending", "pending_approval"],
        PurchaseStatus::Approved => &["approved"],
        PurchaseStatus::Rejected => &["rejected"],
        PurchaseStatus::Paid => &["paid"],
    }
}

async fn conditional_update(
    conn: &mut SqliteConnection,
    id: &PurchaseId,
    update: &StatusUpdate,
    expected: PurchaseStatus,
) -> Result<(), StoreError> {
    if !expected.can_transition_to(update.status) {
        return Err(StoreError::Backend(format!(
            "purchase `{}` cannot move from {} to {}",
            id.0,
            expected.as_str(),
            update.status.as_str()
        )));
    }

    let spellings = stored_spellings(expected);
    let placeholders = vec!["?"; spellings.len()].join(", ");

    let outcome = if update.status == PurchaseStatus::Paid {
        let sql = format!(
            "UPDATE purchase SET status = ?, updated_at = ? WHERE id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.updated_at.to_rfc3339())
            .bind(&id.0);
        for spelling in spellings {
            query = query.bind(*spelling);
        }
        query.execute(&mut *conn).await
    } else {
        let sql = format!(
            "UPDATE purchase
             SET status = ?, approved_by = ?, approved_at = ?, rejection_reason = ?, updated_at = ?
             WHERE id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.approved_by.as_ref().map(|user| user.0.clone()))
            .bind(update.approved_at.map(|at| at.to_rfc3339()))
            .bind(&update.rejection_reason)
            .bind(update.updated_at.to_rfc3339())
            .bind(&id.0);
        for spelling in spellings {
            query = query.bind(*spelling);
        }
        query.execute(&mut *conn).await
    };
    let result = outcome.map_err(RepositoryError::from)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let current: Option<String> = sqlx::query_scalar("SELECT status FROM purchase WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;

    match current {
        None => Err(StoreError::not_found("purchase", &id.0)),
        Some(raw) => {
            let current = PurchaseStatus::parse(&raw).ok_or_else(|| {
                StoreError::Decode(format!("unknown purchase status `{raw}`"))
            })?;
            Err(StoreError::Conflict { purchase_id: id.clone(), current })
        }
    }
}

async fn insert_approval_row(
    conn: &mut SqliteConnection,
    approval: &PurchaseApproval,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO purchase_approval (id, purchase_id, approver_id, action, comments, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&approval.id.0)
    .bind(&approval.purchase_id.0)
    .bind(approval.approver_id.as_ref().map(|user| user.0.clone()))
    .bind(approval.action.as_str())
    .bind(&approval.comments)
    .bind(approval.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl SqlStore {
    pub async fn insert_purchase(&self, purchase: &Purchase) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO purchase (id, project_id, category_id, description, supplier, amount,
                                   purchase_date, requested_by, status, approved_by, approved_at,
                                   rejection_reason, priority, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&purchase.id.0)
        .bind(&purchase.project_id.0)
        .bind(&purchase.category_id.0)
        .bind(&purchase.description)
        .bind(&purchase.supplier)
        .bind(purchase.amount.to_string())
        .bind(purchase.purchase_date.format("%Y-%m-%d").to_string())
        .bind(&purchase.requested_by.0)
        .bind(purchase.status.as_str())
        .bind(purchase.approved_by.as_ref().map(|user| user.0.clone()))
        .bind(purchase.approved_at.map(|at| at.to_rfc3339()))
        .bind(&purchase.rejection_reason)
        .bind(purchase.priority.as_str())
        .bind(purchase.created_at.to_rfc3339())
        .bind(purchase.updated_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PURCHASE_COLUMNS} FROM purchase WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_purchase).transpose()
    }

    async fn approvals_for(
        &self,
        purchase_id: &PurchaseId,
    ) -> Result<Vec<PurchaseApproval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, purchase_id, approver_id, action, comments, created_at
             FROM purchase_approval
             WHERE purchase_id = ?
             ORDER BY created_at, rowid",
        )
        .bind(&purchase_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_approval).collect()
    }
}

#[async_trait]
impl PurchaseStore for SqlStore {
    async fn get_purchase(&self, id: &PurchaseId) -> Result<Purchase, StoreError> {
        self.find_purchase(id).await?.ok_or_else(|| StoreError::not_found("purchase", &id.0))
    }

    async fn get_approval_rules(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ApprovalRule>, StoreError> {
        Ok(self.active_rules(project_id).await?)
    }

    async fn list_approvals(
        &self,
        purchase_id: &PurchaseId,
    ) -> Result<Vec<PurchaseApproval>, StoreError> {
        Ok(self.approvals_for(purchase_id).await?)
    }

    async fn update_purchase_status(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool().acquire().await.map_err(RepositoryError::from)?;
        conditional_update(&mut *conn, id, update, expected).await
    }

    async fn insert_approval(&self, approval: &PurchaseApproval) -> Result<(), StoreError> {
        let mut conn = self.pool().acquire().await.map_err(RepositoryError::from)?;
        insert_approval_row(&mut *conn, approval).await?;
        Ok(())
    }

    async fn commit_decision(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
        prior_decisions: usize,
        approval: &PurchaseApproval,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await.map_err(RepositoryError::from)?;
        conditional_update(&mut *tx, id, update, expected).await?;

        // The update above holds the write lock, so the count cannot move before commit.
        let recorded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM purchase_approval WHERE purchase_id = ?")
                .bind(&id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(RepositoryError::from)?;
        let recorded = usize::try_from(recorded).unwrap_or_default();
        if recorded != prior_decisions {
            return Err(StoreError::HistoryChanged {
                purchase_id: id.clone(),
                expected: prior_decisions,
                found: recorded,
            });
        }

        insert_approval_row(&mut *tx, approval).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}
