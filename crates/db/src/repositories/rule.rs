use sqlx::sqlite::SqliteRow;

use renobudget_core::domain::category::CategoryId;
use renobudget_core::domain::project::ProjectId;
use renobudget_core::domain::rule::{ApprovalRule, ApprovalRuleId};
use renobudget_core::domain::UserId;

use super::{decimal, flag, optional_decimal, optional_text, text, timestamp, RepositoryError, SqlStore};

fn row_to_rule(row: &SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let id = text(row, "id")?;
    let approvers_raw = text(row, "approver_ids_json")?;
    let approver_ids: Vec<String> = serde_json::from_str(&approvers_raw).map_err(|e| {
        RepositoryError::Decode(format!("approval rule `{id}` approver list: {e}"))
    })?;

    Ok(ApprovalRule {
        id: ApprovalRuleId(id),
        project_id: ProjectId(text(row, "project_id")?),
        category_id: optional_text(row, "category_id")?.map(CategoryId),
        min_amount: decimal(row, "min_amount")?,
        max_amount: optional_decimal(row, "max_amount")?,
        approver_ids: approver_ids.into_iter().map(UserId).collect(),
        requires_sequential: flag(row, "requires_sequential")?,
        auto_approve_below: decimal(row, "auto_approve_below")?,
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
    })
}

impl SqlStore {
    pub async fn insert_rule(&self, rule: &ApprovalRule) -> Result<(), RepositoryError> {
        rule.validate()?;
        let approver_ids: Vec<&str> = rule.approver_ids.iter().map(UserId::as_str).collect();
        let approvers_json = serde_json::to_string(&approver_ids)
            .map_err(|e| RepositoryError::Decode(format!("approver list: {e}")))?;

        sqlx::query(
            "INSERT INTO approval_rule (id, project_id, category_id, min_amount, max_amount,
                                        approver_ids_json, requires_sequential,
                                        auto_approve_below, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id.0)
        .bind(&rule.project_id.0)
        .bind(rule.category_id.as_ref().map(|category| category.0.clone()))
        .bind(rule.min_amount.to_string())
        .bind(rule.max_amount.map(|max| max.to_string()))
        .bind(approvers_json)
        .bind(i64::from(rule.requires_sequential))
        .bind(rule.auto_approve_below.to_string())
        .bind(i64::from(rule.is_active))
        .bind(rule.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub(crate) async fn active_rules(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, project_id, category_id, min_amount, max_amount, approver_ids_json,
                    requires_sequential, auto_approve_below, is_active, created_at
             FROM approval_rule
             WHERE project_id = ? AND is_active = 1
             ORDER BY id",
        )
        .bind(&project_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_rule).collect()
    }
}
