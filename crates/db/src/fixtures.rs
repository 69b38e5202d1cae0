use chrono::Utc;
use rust_decimal::Decimal;

use renobudget_core::domain::category::{BudgetCategory, CategoryId, DEFAULT_ALERT_THRESHOLD_PCT};
use renobudget_core::domain::project::{Project, ProjectId, ProjectStatus};
use renobudget_core::domain::purchase::{Purchase, PurchaseId, PurchasePriority, PurchaseStatus};
use renobudget_core::domain::rule::{ApprovalRule, ApprovalRuleId};
use renobudget_core::domain::UserId;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlStore};

pub const PROJECT_ID: &str = "prj-kitchen-remodel";
pub const OWNER_ID: &str = "u-homeowner";
pub const MANAGER_ID: &str = "u-site-manager";
pub const REQUESTER_ID: &str = "u-contractor";
pub const MATERIALS_CATEGORY_ID: &str = "cat-kitchen-materials";
pub const RULE_ID: &str = "rule-kitchen-default";

/// Pending purchase above the auto-approval threshold; routes to the manager.
pub const TILE_PURCHASE_ID: &str = "pur-kitchen-tile";
/// Pending purchase under the auto-approval threshold.
pub const GROUT_PURCHASE_ID: &str = "pur-kitchen-grout";

struct SeedCategory {
    id: &'static str,
    name: &'static str,
    budget: i64,
}

struct SeedPurchase {
    id: &'static str,
    category_id: &'static str,
    description: &'static str,
    supplier: &'static str,
    amount: i64,
    status: PurchaseStatus,
}

const SEED_CATEGORIES: &[SeedCategory] = &[
    SeedCategory { id: MATERIALS_CATEGORY_ID, name: "Materials", budget: 5_000 },
    SeedCategory { id: "cat-kitchen-labor", name: "Labor", budget: 12_000 },
    SeedCategory { id: "cat-kitchen-fixtures", name: "Fixtures", budget: 3_000 },
];

const SEED_PURCHASES: &[SeedPurchase] = &[
    SeedPurchase {
        id: "pur-kitchen-cabinets",
        category_id: MATERIALS_CATEGORY_ID,
        description: "Shaker cabinet set",
        supplier: "Northside Cabinetry",
        amount: 2_500,
        status: PurchaseStatus::Approved,
    },
    SeedPurchase {
        id: "pur-kitchen-countertop",
        category_id: MATERIALS_CATEGORY_ID,
        description: "Quartz countertop slab",
        supplier: "Stone & Co",
        amount: 1_700,
        status: PurchaseStatus::Approved,
    },
    SeedPurchase {
        id: TILE_PURCHASE_ID,
        category_id: MATERIALS_CATEGORY_ID,
        description: "Backsplash tile",
        supplier: "Tile Depot",
        amount: 600,
        status: PurchaseStatus::Pending,
    },
    SeedPurchase {
        id: GROUT_PURCHASE_ID,
        category_id: MATERIALS_CATEGORY_ID,
        description: "Grout and spacers",
        supplier: "Tile Depot",
        amount: 200,
        status: PurchaseStatus::Pending,
    },
];

#[derive(Debug)]
pub struct SeedResult {
    pub project_id: &'static str,
    pub categories_seeded: usize,
    pub purchases_seeded: usize,
    pub rules_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

/// Demo dataset: a "Kitchen Remodel" project whose Materials category sits at 84% of
/// budget, one project-wide approval rule, and two purchases awaiting resolution.
pub struct KitchenRemodelSeed;

impl KitchenRemodelSeed {
    /// Loads the dataset, replacing any previous copy.
    pub async fn load(store: &SqlStore) -> Result<SeedResult, RepositoryError> {
        Self::clean(store.pool()).await?;

        let now = Utc::now();
        let project = Project {
            id: ProjectId(PROJECT_ID.to_string()),
            name: "Kitchen Remodel".to_string(),
            description: Some("Full kitchen renovation, cabinets through fixtures".to_string()),
            total_budget: Decimal::from(25_000),
            owner_id: UserId(OWNER_ID.to_string()),
            status: ProjectStatus::Active,
            auto_approval_ceiling: None,
            created_at: now,
            updated_at: now,
        };

        let categories: Vec<BudgetCategory> = SEED_CATEGORIES
            .iter()
            .map(|seed| BudgetCategory {
                id: CategoryId(seed.id.to_string()),
                project_id: project.id.clone(),
                name: seed.name.to_string(),
                description: None,
                budgeted_amount: Decimal::from(seed.budget),
                spent_amount: approved_spend(seed.id),
                alert_threshold: Decimal::from(DEFAULT_ALERT_THRESHOLD_PCT),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();

        store.insert_project_with_categories(&project, &categories).await?;

        for seed in SEED_PURCHASES {
            let approved = seed.status == PurchaseStatus::Approved;
            store
                .insert_purchase(&Purchase {
                    id: PurchaseId(seed.id.to_string()),
                    project_id: project.id.clone(),
                    category_id: CategoryId(seed.category_id.to_string()),
                    description: seed.description.to_string(),
                    supplier: Some(seed.supplier.to_string()),
                    amount: Decimal::from(seed.amount),
                    purchase_date: now.date_naive(),
                    requested_by: UserId(REQUESTER_ID.to_string()),
                    status: seed.status,
                    approved_by: approved.then(|| UserId(MANAGER_ID.to_string())),
                    approved_at: approved.then_some(now),
                    rejection_reason: None,
                    priority: PurchasePriority::Normal,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }

        store
            .insert_rule(&ApprovalRule {
                id: ApprovalRuleId(RULE_ID.to_string()),
                project_id: project.id.clone(),
                category_id: None,
                min_amount: Decimal::ZERO,
                max_amount: Some(Decimal::from(1_000)),
                approver_ids: vec![UserId(MANAGER_ID.to_string())],
                requires_sequential: false,
                auto_approve_below: Decimal::from(500),
                is_active: true,
                created_at: now,
            })
            .await?;

        Ok(SeedResult {
            project_id: PROJECT_ID,
            categories_seeded: SEED_CATEGORIES.len(),
            purchases_seeded: SEED_PURCHASES.len(),
            rules_seeded: 1,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let project_active: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM project WHERE id = ?1 AND status = 'active')",
        )
        .bind(PROJECT_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("project", project_active == 1));

        let category_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM budget_category WHERE project_id = ?1")
                .bind(PROJECT_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("categories", category_count == SEED_CATEGORIES.len() as i64));

        let purchase_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM purchase WHERE project_id = ?1")
                .bind(PROJECT_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("purchases", purchase_count == SEED_PURCHASES.len() as i64));

        let rule_active: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM approval_rule WHERE id = ?1 AND is_active = 1)",
        )
        .bind(RULE_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("approval rule", rule_active == 1));

        let pending: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM purchase WHERE project_id = ?1 AND status = 'pending' ORDER BY id",
        )
        .bind(PROJECT_ID)
        .fetch_all(pool)
        .await?;
        let mut expected_pending = vec![GROUT_PURCHASE_ID.to_string(), TILE_PURCHASE_ID.to_string()];
        expected_pending.sort();
        checks.push(("pending purchases", pending == expected_pending));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the dataset; categories, purchases, approvals, rules and alerts cascade.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM project WHERE id = ?1").bind(PROJECT_ID).execute(pool).await?;
        Ok(())
    }
}

fn approved_spend(category_id: &str) -> Decimal {
    SEED_PURCHASES
        .iter()
        .filter(|seed| seed.category_id == category_id && seed.status.counts_toward_spend())
        .map(|seed| Decimal::from(seed.amount))
        .sum()
}
