use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;

use renobudget_core::domain::category::{BudgetCategory, CategoryId, DEFAULT_ALERT_THRESHOLD_PCT};
use renobudget_core::domain::project::{Project, ProjectId, ProjectStatus};
use renobudget_core::domain::UserId;
use renobudget_core::store::{ProjectStore, StoreError};

use super::{
    decimal, flag, optional_decimal, optional_text, text, timestamp, RepositoryError, SqlStore,
};

const PROJECT_COLUMNS: &str = "id, name, description, total_budget, owner_id, status,
    auto_approval_ceiling, created_at, updated_at";

pub(crate) const CATEGORY_COLUMNS: &str = "id, project_id, name, description, budgeted_amount,
    spent_amount, alert_threshold, is_active, created_at, updated_at";

pub(crate) fn row_to_project(row: &SqliteRow) -> Result<Project, RepositoryError> {
    let status_raw = text(row, "status")?;
    let status = ProjectStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown project status `{status_raw}`"))
    })?;

    Ok(Project {
        id: ProjectId(text(row, "id")?),
        name: text(row, "name")?,
        description: optional_text(row, "description")?,
        total_budget: decimal(row, "total_budget")?,
        owner_id: UserId(text(row, "owner_id")?),
        status,
        auto_approval_ceiling: optional_decimal(row, "auto_approval_ceiling")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

pub(crate) fn row_to_category(row: &SqliteRow) -> Result<BudgetCategory, RepositoryError> {
    Ok(BudgetCategory {
        id: CategoryId(text(row, "id")?),
        project_id: ProjectId(text(row, "project_id")?),
        name: text(row, "name")?,
        description: optional_text(row, "description")?,
        budgeted_amount: decimal(row, "budgeted_amount")?,
        spent_amount: optional_decimal(row, "spent_amount")?.unwrap_or(Decimal::ZERO),
        alert_threshold: optional_decimal(row, "alert_threshold")?
            .unwrap_or_else(|| Decimal::from(DEFAULT_ALERT_THRESHOLD_PCT)),
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

impl SqlStore {
    async fn find_project(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM project WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_project).transpose()
    }

    async fn active_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM project WHERE status = 'active' ORDER BY created_at, id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_project).collect()
    }

    async fn find_category(&self, id: &CategoryId) -> Result<Option<BudgetCategory>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CATEGORY_COLUMNS} FROM budget_category WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(self.pool())
                .await?;
        row.as_ref().map(row_to_category).transpose()
    }

    pub(crate) async fn insert_project_with_categories(
        &self,
        project: &Project,
        categories: &[BudgetCategory],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO project (id, name, description, total_budget, owner_id, status,
                                  auto_approval_ceiling, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&project.id.0)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.total_budget.to_string())
        .bind(&project.owner_id.0)
        .bind(project.status.as_str())
        .bind(project.auto_approval_ceiling.map(|value| value.to_string()))
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for category in categories {
            sqlx::query(
                "INSERT INTO budget_category (id, project_id, name, description, budgeted_amount,
                                              spent_amount, alert_threshold, is_active,
                                              created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&category.id.0)
            .bind(&category.project_id.0)
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.budgeted_amount.to_string())
            .bind(category.spent_amount.to_string())
            .bind(category.alert_threshold.to_string())
            .bind(i64::from(category.is_active))
            .bind(category.created_at.to_rfc3339())
            .bind(category.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqlStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.find_project(id).await?.ok_or_else(|| StoreError::not_found("project", &id.0))
    }

    async fn list_active_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.active_projects().await?)
    }

    async fn get_category(&self, id: &CategoryId) -> Result<BudgetCategory, StoreError> {
        self.find_category(id).await?.ok_or_else(|| StoreError::not_found("budget category", &id.0))
    }

    async fn create_project(
        &self,
        project: &Project,
        categories: &[BudgetCategory],
    ) -> Result<(), StoreError> {
        Ok(self.insert_project_with_categories(project, categories).await?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use sqlx::Row;

    use renobudget_core::domain::category::CategoryId;
    use renobudget_core::domain::project::{ProjectId, ProjectStatus};
    use renobudget_core::store::{ProjectStore, StoreError};

    use crate::repositories::test_support::{category, kitchen, project, store};

    #[tokio::test]
    async fn create_and_load_project_with_categories() {
        let store = kitchen().await;

        let loaded = store.get_project(&ProjectId("prj-kitchen".to_string())).await.expect("project");
        assert_eq!(loaded.name, "Kitchen Remodel");
        assert_eq!(loaded.status, ProjectStatus::Active);
        assert_eq!(loaded.total_budget, Decimal::from(20_000));

        let materials =
            store.get_category(&CategoryId("cat-materials".to_string())).await.expect("category");
        assert_eq!(materials.budgeted_amount, Decimal::from(5_000));
        assert_eq!(materials.alert_threshold, Decimal::from(80));
    }

    #[tokio::test]
    async fn failed_category_insert_rolls_back_project() {
        let store = store().await;
        let duplicate = category("cat-dup", "prj-new", 100);

        let error = store
            .create_project(&project("prj-new"), &[duplicate.clone(), duplicate])
            .await
            .expect_err("duplicate category id");
        assert!(matches!(error, StoreError::Backend(_)));

        let missing = store.get_project(&ProjectId("prj-new".to_string())).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn missing_threshold_defaults_to_eighty() {
        let store = kitchen().await;
        sqlx::query("UPDATE budget_category SET alert_threshold = NULL WHERE id = 'cat-materials'")
            .execute(store.pool())
            .await
            .expect("clear threshold");

        let materials =
            store.get_category(&CategoryId("cat-materials".to_string())).await.expect("category");
        assert_eq!(materials.alert_threshold, Decimal::from(80));
    }

    #[tokio::test]
    async fn only_active_projects_are_listed() {
        let store = kitchen().await;
        let mut archived = project("prj-archived");
        archived.status = ProjectStatus::Completed;
        store.create_project(&archived, &[]).await.expect("archived project");

        let active = store.list_active_projects().await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ProjectId("prj-kitchen".to_string()));

        let stored_status: String = sqlx::query("SELECT status FROM project WHERE id = 'prj-archived'")
            .fetch_one(store.pool())
            .await
            .expect("status row")
            .get("status");
        assert_eq!(stored_status, "completed");
    }
}
