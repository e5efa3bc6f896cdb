//! PostgreSQL-backed entity store.
//!
//! Schema lives in `migrations/0001_inventory.sql` and is applied with
//! [`PostgresInventoryStore::migrate`]. Owner rows are locked with
//! `SELECT ... FOR UPDATE` inside a [`PostgresTransaction`], so concurrent
//! movements on the same category or cylinder serialize on the row lock while
//! movements on different owners proceed in parallel.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (other) | any other | `Database` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | Other | N/A | `Database` |
//!
//! Listing queries use a single statement per shape: every optional filter is
//! bound as a nullable parameter (`$n IS NULL OR ...`), and the sort column is
//! picked from a fixed whitelist. Totals come from a separate `COUNT(*)` with
//! the same predicates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId, DomainError, MovementId, UserId};
use gascyl_inventory::{Category, Cylinder, CylinderType, Movement, MovementOwner};

use super::query::{
    CategoryFilter, CategorySort, CylinderFilter, CylinderSort, MovementFilter, Page, PageMeta,
    PageRequest,
};
use super::{InventoryStore, StoreError, StoreResult, StoreTransaction};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

const CATEGORY_COLUMNS: &str = "id, name, description, gas_type, location, status, \
    total_quantity, filled_quantity, empty_quantity, price_cents, deposit_cents, \
    last_restocked, created_at, updated_at";

const CYLINDER_TYPE_COLUMNS: &str = "id, name, gas_type, capacity_liters, description, \
    price_cents, deposit_cents, inspection_interval_days, created_at, updated_at";

const CYLINDER_COLUMNS: &str = "c.id, c.serial_number, c.type_id, c.status, c.location, \
    c.customer_id, c.last_filled_at, c.last_inspected_at, c.manufactured_on, c.notes, \
    c.created_at, c.updated_at";

const MOVEMENT_COLUMNS: &str = "id, movement_type, from_location, to_location, from_status, \
    to_status, quantity, transaction_date, customer_id, driver_id, invoice_id, performed_by, \
    notes, created_at";

const CATEGORY_PREDICATES: &str = r#"
    ($1::text IS NULL OR status = $1)
    AND ($2::text IS NULL OR LOWER(gas_type) = LOWER($2))
    AND ($3::text IS NULL OR LOWER(location) = LOWER($3))
    AND ($4::text IS NULL OR name ILIKE $4 OR COALESCE(description, '') ILIKE $4 OR location ILIKE $4)
    AND ($5::bigint IS NULL OR filled_quantity >= $5)
    AND ($6::bigint IS NULL OR filled_quantity <= $6)
    AND ($7::bool IS NULL OR ((filled_quantity * 100 < total_quantity * 20 AND status = 'active') = $7))
"#;

const CYLINDER_PREDICATES: &str = r#"
    ($1::text IS NULL OR c.status = $1)
    AND ($2::uuid IS NULL OR c.type_id = $2)
    AND ($3::uuid IS NULL OR c.customer_id = $3)
    AND ($4::text IS NULL OR LOWER(c.location) = LOWER($4))
    AND ($5::text IS NULL OR LOWER(t.gas_type) = LOWER($5))
    AND ($6::text IS NULL OR c.serial_number ILIKE $6 OR c.location ILIKE $6 OR COALESCE(c.notes, '') ILIKE $6)
"#;

/// Postgres-backed inventory store.
///
/// Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the inventory schema. Safe to run repeatedly.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresTransaction { tx })
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn find_category(&self, id: CategoryId) -> StoreResult<Option<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_category", e))?;
        row.map(|r| Category::try_from(decode::<CategoryRow>(&r)?)).transpose()
    }

    #[instrument(skip(self, filter), err)]
    async fn list_categories(
        &self,
        filter: &CategoryFilter,
        sort: CategorySort,
        page: PageRequest,
    ) -> StoreResult<Page<Category>> {
        let params = CategoryParams::from(filter);

        let sql = format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE {CATEGORY_PREDICATES} \
             ORDER BY {} {}, id ASC LIMIT $8 OFFSET $9",
            sort.field.column(),
            sort.order.as_sql(),
        );
        let rows = params
            .bind(sqlx::query(&sql))
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_categories", e))?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM categories WHERE {CATEGORY_PREDICATES}");
        let total: i64 = params
            .bind(sqlx::query(&count_sql))
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_categories", e))?;

        let items = rows
            .iter()
            .map(|r| Category::try_from(decode::<CategoryRow>(r)?))
            .collect::<StoreResult<Vec<Category>>>()?;

        Ok(Page {
            items,
            meta: PageMeta::new(page, total.max(0) as u64),
        })
    }

    async fn all_categories(&self) -> StoreResult<Vec<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY created_at, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_categories", e))?;
        rows.iter()
            .map(|r| Category::try_from(decode::<CategoryRow>(r)?))
            .collect()
    }

    #[instrument(skip(self), fields(cylinder_type_id = %id), err)]
    async fn find_cylinder_type(&self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>> {
        let sql = format!("SELECT {CYLINDER_TYPE_COLUMNS} FROM cylinder_types WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_cylinder_type", e))?;
        row.map(|r| CylinderType::try_from(decode::<CylinderTypeRow>(&r)?)).transpose()
    }

    async fn list_cylinder_types(&self, page: PageRequest) -> StoreResult<Page<CylinderType>> {
        let sql = format!(
            "SELECT {CYLINDER_TYPE_COLUMNS} FROM cylinder_types ORDER BY name ASC, id ASC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_cylinder_types", e))?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM cylinder_types")
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_cylinder_types", e))?;

        let items = rows
            .iter()
            .map(|r| CylinderType::try_from(decode::<CylinderTypeRow>(r)?))
            .collect::<StoreResult<Vec<CylinderType>>>()?;

        Ok(Page {
            items,
            meta: PageMeta::new(page, total.max(0) as u64),
        })
    }

    async fn all_cylinder_types(&self) -> StoreResult<Vec<CylinderType>> {
        let sql = format!("SELECT {CYLINDER_TYPE_COLUMNS} FROM cylinder_types ORDER BY name, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_cylinder_types", e))?;
        rows.iter()
            .map(|r| CylinderType::try_from(decode::<CylinderTypeRow>(r)?))
            .collect()
    }

    #[instrument(skip(self), fields(cylinder_id = %id), err)]
    async fn find_cylinder(&self, id: CylinderId) -> StoreResult<Option<Cylinder>> {
        let sql = format!("SELECT {CYLINDER_COLUMNS} FROM cylinders c WHERE c.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_cylinder", e))?;
        row.map(|r| Cylinder::try_from(decode::<CylinderRow>(&r)?)).transpose()
    }

    #[instrument(skip(self, filter), err)]
    async fn list_cylinders(
        &self,
        filter: &CylinderFilter,
        sort: CylinderSort,
        page: PageRequest,
    ) -> StoreResult<Page<Cylinder>> {
        let params = CylinderParams::from(filter);

        let sql = format!(
            "SELECT {CYLINDER_COLUMNS} FROM cylinders c \
             LEFT JOIN cylinder_types t ON t.id = c.type_id \
             WHERE {CYLINDER_PREDICATES} \
             ORDER BY c.{} {}, c.id ASC LIMIT $7 OFFSET $8",
            sort.field.column(),
            sort.order.as_sql(),
        );
        let rows = params
            .bind(sqlx::query(&sql))
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_cylinders", e))?;

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM cylinders c \
             LEFT JOIN cylinder_types t ON t.id = c.type_id \
             WHERE {CYLINDER_PREDICATES}"
        );
        let total: i64 = params
            .bind(sqlx::query(&count_sql))
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_cylinders", e))?;

        let items = rows
            .iter()
            .map(|r| Cylinder::try_from(decode::<CylinderRow>(r)?))
            .collect::<StoreResult<Vec<Cylinder>>>()?;

        Ok(Page {
            items,
            meta: PageMeta::new(page, total.max(0) as u64),
        })
    }

    async fn all_cylinders(&self) -> StoreResult<Vec<Cylinder>> {
        let sql = format!("SELECT {CYLINDER_COLUMNS} FROM cylinders c ORDER BY c.created_at, c.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_cylinders", e))?;
        rows.iter()
            .map(|r| Cylinder::try_from(decode::<CylinderRow>(r)?))
            .collect()
    }

    #[instrument(skip(self), fields(movement_id = %id), err)]
    async fn find_movement(&self, id: MovementId) -> StoreResult<Option<Movement>> {
        for kind in OwnerKind::BOTH {
            let sql = format!(
                "SELECT {MOVEMENT_COLUMNS}, {} AS owner_id FROM {} WHERE id = $1",
                kind.owner_column(),
                kind.table(),
            );
            let row = sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_movement", e))?;
            if let Some(row) = row {
                return decode::<MovementRow>(&row)?.into_movement(kind).map(Some);
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, filter), fields(owner = %owner), err)]
    async fn list_movements(
        &self,
        owner: MovementOwner,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Movement>> {
        let (kind, owner_id) = OwnerKind::of(owner);
        let predicates = format!(
            "{} = $1 \
             AND ($2::text IS NULL OR movement_type = $2) \
             AND ($3::timestamptz IS NULL OR transaction_date >= $3) \
             AND ($4::timestamptz IS NULL OR transaction_date <= $4)",
            kind.owner_column(),
        );
        let movement_type = filter.movement_type.map(|t| t.as_str());

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS}, {} AS owner_id FROM {} WHERE {predicates} \
             ORDER BY transaction_date DESC, created_at DESC, id DESC LIMIT $5 OFFSET $6",
            kind.owner_column(),
            kind.table(),
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .bind(movement_type)
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM {} WHERE {predicates}", kind.table());
        let total: i64 = sqlx::query(&count_sql)
            .bind(owner_id)
            .bind(movement_type)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let items = rows
            .iter()
            .map(|r| decode::<MovementRow>(r)?.into_movement(kind))
            .collect::<StoreResult<Vec<Movement>>>()?;

        Ok(Page {
            items,
            meta: PageMeta::new(page, total.max(0) as u64),
        })
    }
}

/// A database transaction. Dropping it without `commit` rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_category(&mut self, id: CategoryId) -> StoreResult<Option<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_category", e))?;
        row.map(|r| Category::try_from(decode::<CategoryRow>(&r)?)).transpose()
    }

    async fn insert_category(&mut self, category: &Category) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (
                id, name, description, gas_type, location, status,
                total_quantity, filled_quantity, empty_quantity,
                price_cents, deposit_cents, last_restocked, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(category.id.as_uuid())
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.gas_type)
        .bind(&category.location)
        .bind(category.status.as_str())
        .bind(category.total_quantity)
        .bind(category.filled_quantity)
        .bind(category.empty_quantity)
        .bind(category.price_cents)
        .bind(category.deposit_cents)
        .bind(category.last_restocked)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_category", e))?;
        Ok(())
    }

    async fn update_category(&mut self, category: &Category) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE categories SET
                name = $2, description = $3, gas_type = $4, location = $5, status = $6,
                total_quantity = $7, filled_quantity = $8, empty_quantity = $9,
                price_cents = $10, deposit_cents = $11, last_restocked = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(category.id.as_uuid())
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.gas_type)
        .bind(&category.location)
        .bind(category.status.as_str())
        .bind(category.total_quantity)
        .bind(category.filled_quantity)
        .bind(category.empty_quantity)
        .bind(category.price_cents)
        .bind(category.deposit_cents)
        .bind(category.last_restocked)
        .bind(category.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_category", e))?;
        Ok(())
    }

    async fn delete_category(&mut self, id: CategoryId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_category", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn lock_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>> {
        let sql = format!("SELECT {CYLINDER_TYPE_COLUMNS} FROM cylinder_types WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_cylinder_type", e))?;
        row.map(|r| CylinderType::try_from(decode::<CylinderTypeRow>(&r)?)).transpose()
    }

    async fn insert_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cylinder_types (
                id, name, gas_type, capacity_liters, description,
                price_cents, deposit_cents, inspection_interval_days, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(cylinder_type.id.as_uuid())
        .bind(&cylinder_type.name)
        .bind(&cylinder_type.gas_type)
        .bind(cylinder_type.capacity_liters)
        .bind(&cylinder_type.description)
        .bind(cylinder_type.price_cents)
        .bind(cylinder_type.deposit_cents)
        .bind(interval_to_db(cylinder_type.inspection_interval_days))
        .bind(cylinder_type.created_at)
        .bind(cylinder_type.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_cylinder_type", e))?;
        Ok(())
    }

    async fn update_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cylinder_types SET
                name = $2, gas_type = $3, capacity_liters = $4, description = $5,
                price_cents = $6, deposit_cents = $7, inspection_interval_days = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(cylinder_type.id.as_uuid())
        .bind(&cylinder_type.name)
        .bind(&cylinder_type.gas_type)
        .bind(cylinder_type.capacity_liters)
        .bind(&cylinder_type.description)
        .bind(cylinder_type.price_cents)
        .bind(cylinder_type.deposit_cents)
        .bind(interval_to_db(cylinder_type.inspection_interval_days))
        .bind(cylinder_type.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_cylinder_type", e))?;
        Ok(())
    }

    async fn delete_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cylinder_types WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_cylinder_type", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_cylinders_of_type(&mut self, id: CylinderTypeId) -> StoreResult<u64> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM cylinders WHERE type_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_cylinders_of_type", e))?;
        Ok(total.max(0) as u64)
    }

    async fn lock_cylinder(&mut self, id: CylinderId) -> StoreResult<Option<Cylinder>> {
        let sql = format!("SELECT {CYLINDER_COLUMNS} FROM cylinders c WHERE c.id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_cylinder", e))?;
        row.map(|r| Cylinder::try_from(decode::<CylinderRow>(&r)?)).transpose()
    }

    async fn find_cylinder_by_serial(&mut self, serial_number: &str) -> StoreResult<Option<CylinderId>> {
        let row = sqlx::query("SELECT id FROM cylinders WHERE serial_number = $1")
            .bind(serial_number)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_cylinder_by_serial", e))?;
        row.map(|r| {
            r.try_get::<Uuid, _>("id")
                .map(CylinderId::from_uuid)
                .map_err(|e| StoreError::Decode(e.to_string()))
        })
        .transpose()
    }

    async fn insert_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cylinders (
                id, serial_number, type_id, status, location, customer_id,
                last_filled_at, last_inspected_at, manufactured_on, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(cylinder.id.as_uuid())
        .bind(&cylinder.serial_number)
        .bind(cylinder.type_id.as_uuid())
        .bind(cylinder.status.as_str())
        .bind(&cylinder.location)
        .bind(cylinder.customer_id)
        .bind(cylinder.last_filled_at)
        .bind(cylinder.last_inspected_at)
        .bind(cylinder.manufactured_on)
        .bind(&cylinder.notes)
        .bind(cylinder.created_at)
        .bind(cylinder.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_cylinder", e))?;
        Ok(())
    }

    async fn update_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE cylinders SET
                serial_number = $2, type_id = $3, status = $4, location = $5, customer_id = $6,
                last_filled_at = $7, last_inspected_at = $8, manufactured_on = $9, notes = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(cylinder.id.as_uuid())
        .bind(&cylinder.serial_number)
        .bind(cylinder.type_id.as_uuid())
        .bind(cylinder.status.as_str())
        .bind(&cylinder.location)
        .bind(cylinder.customer_id)
        .bind(cylinder.last_filled_at)
        .bind(cylinder.last_inspected_at)
        .bind(cylinder.manufactured_on)
        .bind(&cylinder.notes)
        .bind(cylinder.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_cylinder", e))?;
        Ok(())
    }

    async fn delete_cylinder(&mut self, id: CylinderId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cylinders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_cylinder", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()> {
        let (kind, owner_id) = OwnerKind::of(movement.owner);
        let sql = format!(
            "INSERT INTO {} (id, {}, movement_type, from_location, to_location, from_status, \
             to_status, quantity, transaction_date, customer_id, driver_id, invoice_id, \
             performed_by, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            kind.table(),
            kind.owner_column(),
        );
        sqlx::query(&sql)
            .bind(movement.id.as_uuid())
            .bind(owner_id)
            .bind(movement.movement_type.as_str())
            .bind(&movement.from_location)
            .bind(&movement.to_location)
            .bind(movement.from_status.map(|s| s.as_str()))
            .bind(movement.to_status.map(|s| s.as_str()))
            .bind(movement.quantity)
            .bind(movement.transaction_date)
            .bind(movement.customer_id)
            .bind(movement.driver_id)
            .bind(movement.invoice_id)
            .bind(movement.performed_by.map(|u| *u.as_uuid()))
            .bind(&movement.notes)
            .bind(movement.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn lock_movement(&mut self, id: MovementId) -> StoreResult<Option<Movement>> {
        for kind in OwnerKind::BOTH {
            let sql = format!(
                "SELECT {MOVEMENT_COLUMNS}, {} AS owner_id FROM {} WHERE id = $1 FOR UPDATE",
                kind.owner_column(),
                kind.table(),
            );
            let row = sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("lock_movement", e))?;
            if let Some(row) = row {
                return decode::<MovementRow>(&row)?.into_movement(kind).map(Some);
            }
        }
        Ok(None)
    }

    async fn update_movement_notes(&mut self, movement: &Movement) -> StoreResult<()> {
        let (kind, _) = OwnerKind::of(movement.owner);
        let sql = format!("UPDATE {} SET notes = $2 WHERE id = $1", kind.table());
        sqlx::query(&sql)
            .bind(movement.id.as_uuid())
            .bind(&movement.notes)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_movement_notes", e))?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{} failed: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique_violation, foreign_key_violation
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode<T>(row: &PgRow) -> StoreResult<T>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Decode(e.to_string()))
}

fn corrupt(err: DomainError) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn interval_to_db(days: Option<u32>) -> Option<i32> {
    days.map(|d| i32::try_from(d).unwrap_or(i32::MAX))
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OwnerKind {
    Category,
    Cylinder,
}

impl OwnerKind {
    const BOTH: [OwnerKind; 2] = [OwnerKind::Category, OwnerKind::Cylinder];

    fn of(owner: MovementOwner) -> (Self, Uuid) {
        match owner {
            MovementOwner::Category(id) => (OwnerKind::Category, *id.as_uuid()),
            MovementOwner::Cylinder(id) => (OwnerKind::Cylinder, *id.as_uuid()),
        }
    }

    fn table(&self) -> &'static str {
        match self {
            OwnerKind::Category => "category_movements",
            OwnerKind::Cylinder => "cylinder_movements",
        }
    }

    fn owner_column(&self) -> &'static str {
        match self {
            OwnerKind::Category => "category_id",
            OwnerKind::Cylinder => "cylinder_id",
        }
    }

    fn owner(&self, id: Uuid) -> MovementOwner {
        match self {
            OwnerKind::Category => MovementOwner::Category(CategoryId::from_uuid(id)),
            OwnerKind::Cylinder => MovementOwner::Cylinder(CylinderId::from_uuid(id)),
        }
    }
}

// Bound filter parameters

struct CategoryParams {
    status: Option<&'static str>,
    gas_type: Option<String>,
    location: Option<String>,
    search: Option<String>,
    min_filled: Option<i64>,
    max_filled: Option<i64>,
    requires_restock: Option<bool>,
}

impl From<&CategoryFilter> for CategoryParams {
    fn from(filter: &CategoryFilter) -> Self {
        Self {
            status: filter.status.map(|s| s.as_str()),
            gas_type: filter.gas_type.clone(),
            location: filter.location.clone(),
            search: filter.search_term().map(|t| like_pattern(&t)),
            min_filled: filter.min_filled,
            max_filled: filter.max_filled,
            requires_restock: filter.requires_restock,
        }
    }
}

impl CategoryParams {
    /// Binds `$1..=$7`.
    fn bind<'q>(&'q self, query: Query<'q, Postgres, PgArguments>) -> Query<'q, Postgres, PgArguments> {
        query
            .bind(self.status)
            .bind(self.gas_type.as_deref())
            .bind(self.location.as_deref())
            .bind(self.search.as_deref())
            .bind(self.min_filled)
            .bind(self.max_filled)
            .bind(self.requires_restock)
    }
}

struct CylinderParams {
    status: Option<&'static str>,
    type_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    location: Option<String>,
    gas_type: Option<String>,
    search: Option<String>,
}

impl From<&CylinderFilter> for CylinderParams {
    fn from(filter: &CylinderFilter) -> Self {
        Self {
            status: filter.status.map(|s| s.as_str()),
            type_id: filter.type_id.map(|t| *t.as_uuid()),
            customer_id: filter.customer_id,
            location: filter.location.clone(),
            gas_type: filter.gas_type.clone(),
            search: filter.search_term().map(|t| like_pattern(&t)),
        }
    }
}

impl CylinderParams {
    /// Binds `$1..=$6`.
    fn bind<'q>(&'q self, query: Query<'q, Postgres, PgArguments>) -> Query<'q, Postgres, PgArguments> {
        query
            .bind(self.status)
            .bind(self.type_id)
            .bind(self.customer_id)
            .bind(self.location.as_deref())
            .bind(self.gas_type.as_deref())
            .bind(self.search.as_deref())
    }
}

// SQLx row types

#[derive(Debug)]
struct CategoryRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    gas_type: String,
    location: String,
    status: String,
    total_quantity: i64,
    filled_quantity: i64,
    empty_quantity: i64,
    price_cents: i64,
    deposit_cents: i64,
    last_restocked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CategoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CategoryRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            gas_type: row.try_get("gas_type")?,
            location: row.try_get("location")?,
            status: row.try_get("status")?,
            total_quantity: row.try_get("total_quantity")?,
            filled_quantity: row.try_get("filled_quantity")?,
            empty_quantity: row.try_get("empty_quantity")?,
            price_cents: row.try_get("price_cents")?,
            deposit_cents: row.try_get("deposit_cents")?,
            last_restocked: row.try_get("last_restocked")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<CategoryRow> for Category {
    type Error = StoreError;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        let category = Category {
            id: CategoryId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            gas_type: row.gas_type,
            location: row.location,
            status: row.status.parse().map_err(corrupt)?,
            total_quantity: row.total_quantity,
            filled_quantity: row.filled_quantity,
            empty_quantity: row.empty_quantity,
            price_cents: row.price_cents,
            deposit_cents: row.deposit_cents,
            last_restocked: row.last_restocked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        category.check_counters().map_err(corrupt)?;
        Ok(category)
    }
}

#[derive(Debug)]
struct CylinderTypeRow {
    id: Uuid,
    name: String,
    gas_type: String,
    capacity_liters: f64,
    description: Option<String>,
    price_cents: i64,
    deposit_cents: i64,
    inspection_interval_days: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CylinderTypeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CylinderTypeRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            gas_type: row.try_get("gas_type")?,
            capacity_liters: row.try_get("capacity_liters")?,
            description: row.try_get("description")?,
            price_cents: row.try_get("price_cents")?,
            deposit_cents: row.try_get("deposit_cents")?,
            inspection_interval_days: row.try_get("inspection_interval_days")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<CylinderTypeRow> for CylinderType {
    type Error = StoreError;

    fn try_from(row: CylinderTypeRow) -> Result<Self, Self::Error> {
        let inspection_interval_days = row
            .inspection_interval_days
            .map(|d| {
                u32::try_from(d)
                    .map_err(|_| StoreError::Decode(format!("negative inspection interval {d}")))
            })
            .transpose()?;
        Ok(CylinderType {
            id: CylinderTypeId::from_uuid(row.id),
            name: row.name,
            gas_type: row.gas_type,
            capacity_liters: row.capacity_liters,
            description: row.description,
            price_cents: row.price_cents,
            deposit_cents: row.deposit_cents,
            inspection_interval_days,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct CylinderRow {
    id: Uuid,
    serial_number: String,
    type_id: Uuid,
    status: String,
    location: String,
    customer_id: Option<Uuid>,
    last_filled_at: Option<DateTime<Utc>>,
    last_inspected_at: Option<DateTime<Utc>>,
    manufactured_on: Option<NaiveDate>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CylinderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CylinderRow {
            id: row.try_get("id")?,
            serial_number: row.try_get("serial_number")?,
            type_id: row.try_get("type_id")?,
            status: row.try_get("status")?,
            location: row.try_get("location")?,
            customer_id: row.try_get("customer_id")?,
            last_filled_at: row.try_get("last_filled_at")?,
            last_inspected_at: row.try_get("last_inspected_at")?,
            manufactured_on: row.try_get("manufactured_on")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<CylinderRow> for Cylinder {
    type Error = StoreError;

    fn try_from(row: CylinderRow) -> Result<Self, Self::Error> {
        Ok(Cylinder {
            id: CylinderId::from_uuid(row.id),
            serial_number: row.serial_number,
            type_id: CylinderTypeId::from_uuid(row.type_id),
            status: row.status.parse().map_err(corrupt)?,
            location: row.location,
            customer_id: row.customer_id,
            last_filled_at: row.last_filled_at,
            last_inspected_at: row.last_inspected_at,
            manufactured_on: row.manufactured_on,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    owner_id: Uuid,
    movement_type: String,
    from_location: Option<String>,
    to_location: Option<String>,
    from_status: Option<String>,
    to_status: Option<String>,
    quantity: i64,
    transaction_date: DateTime<Utc>,
    customer_id: Option<Uuid>,
    driver_id: Option<Uuid>,
    invoice_id: Option<Uuid>,
    performed_by: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            movement_type: row.try_get("movement_type")?,
            from_location: row.try_get("from_location")?,
            to_location: row.try_get("to_location")?,
            from_status: row.try_get("from_status")?,
            to_status: row.try_get("to_status")?,
            quantity: row.try_get("quantity")?,
            transaction_date: row.try_get("transaction_date")?,
            customer_id: row.try_get("customer_id")?,
            driver_id: row.try_get("driver_id")?,
            invoice_id: row.try_get("invoice_id")?,
            performed_by: row.try_get("performed_by")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl MovementRow {
    fn into_movement(self, kind: OwnerKind) -> StoreResult<Movement> {
        Ok(Movement {
            id: MovementId::from_uuid(self.id),
            owner: kind.owner(self.owner_id),
            movement_type: self.movement_type.parse().map_err(corrupt)?,
            from_location: self.from_location,
            to_location: self.to_location,
            from_status: self.from_status.map(|s| s.parse()).transpose().map_err(corrupt)?,
            to_status: self.to_status.map(|s| s.parse()).transpose().map_err(corrupt)?,
            quantity: self.quantity,
            transaction_date: self.transaction_date,
            customer_id: self.customer_id,
            driver_id: self.driver_id,
            invoice_id: self.invoice_id,
            performed_by: self.performed_by.map(UserId::from_uuid),
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("o2"), "%o2%");
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }

    #[test]
    fn owner_kind_routes_to_its_table() {
        let category = MovementOwner::Category(CategoryId::new());
        let (kind, id) = OwnerKind::of(category);
        assert_eq!(kind.table(), "category_movements");
        assert_eq!(kind.owner_column(), "category_id");
        assert_eq!(kind.owner(id), category);

        let cylinder = MovementOwner::Cylinder(CylinderId::new());
        let (kind, id) = OwnerKind::of(cylinder);
        assert_eq!(kind.table(), "cylinder_movements");
        assert_eq!(kind.owner(id), cylinder);
    }

    #[test]
    fn cylinder_params_carry_owned_filter_values() {
        let type_id = CylinderTypeId::new();
        let filter = CylinderFilter {
            status: Some(gascyl_inventory::CylinderStatus::Loaned),
            type_id: Some(type_id),
            search: Some("ox".to_string()),
            ..CylinderFilter::default()
        };
        let params = CylinderParams::from(&filter);
        assert_eq!(params.type_id, Some(Uuid::from(type_id)));
        assert_eq!(params.status, Some("loaned"));
        assert_eq!(params.search.as_deref(), Some("%ox%"));
    }

    fn category_row(total: i64, filled: i64, empty: i64) -> CategoryRow {
        CategoryRow {
            id: Uuid::now_v7(),
            name: "Oxygen 50L".to_string(),
            description: None,
            gas_type: "Oxygen".to_string(),
            location: "Main Depot".to_string(),
            status: "active".to_string(),
            total_quantity: total,
            filled_quantity: filled,
            empty_quantity: empty,
            price_cents: 0,
            deposit_cents: 0,
            last_restocked: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn category_rows_breaking_the_counter_invariant_are_rejected() {
        assert!(Category::try_from(category_row(100, 80, 20)).is_ok());
        assert!(matches!(
            Category::try_from(category_row(90, 80, 20)),
            Err(StoreError::Decode(_))
        ));

        let mut row = category_row(100, 80, 20);
        row.status = "archived".to_string();
        assert!(matches!(Category::try_from(row), Err(StoreError::Decode(_))));
    }

    #[test]
    fn interval_saturates_into_integer_column() {
        assert_eq!(interval_to_db(None), None);
        assert_eq!(interval_to_db(Some(365)), Some(365));
        assert_eq!(interval_to_db(Some(u32::MAX)), Some(i32::MAX));
    }
}
