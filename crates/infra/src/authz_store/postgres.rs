//! Postgres-backed authorization store.
//!
//! Uniqueness among active rows is enforced by partial unique indexes (see
//! `migrations/0001_authz.sql`), so concurrent admin writes cannot both win.
//!
//! ## Error Mapping
//!
//! | SQLx Error | Constraint | StoreError |
//! |------------|------------|------------|
//! | Database `23505` | `permission_keys_active_sibling_order_uq` | `Domain(OrderingInvalid)` |
//! | Database `23505` | any other unique index | `Domain(Duplicate)` |
//! | Database `23503` | foreign key | `Domain(NotFound)` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | Other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use gatehouse_auth::{
    EndpointRuleRow, PermissionCatalog, PermissionKey, PermissionKeyRow, RoleGrantRow, RoleRow,
    RoleStatus, RuleBindingRow,
};
use gatehouse_auth::rule::normalize_path;
use gatehouse_core::{DomainError, PermissionKeyId, RoleId, RuleId};

use super::r#trait::{AuthzStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_authz.sql");

const SIBLING_ORDER_CONSTRAINT: &str = "permission_keys_active_sibling_order_uq";

/// Postgres-backed authorization store.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PostgresAuthzStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthzStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn active_catalog(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<PermissionCatalog, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, display_name, parent_id, sort_order, retired
            FROM permission_keys
            WHERE NOT retired
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("active_catalog", e))?;

        let rows = rows
            .iter()
            .map(permission_key_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("active_catalog", e))?;
        Ok(PermissionCatalog::build(rows))
    }
}

#[async_trait]
impl AuthzStore for PostgresAuthzStore {
    #[instrument(skip(self), err)]
    async fn active_rules(&self) -> Result<Vec<EndpointRuleRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, method, require_authentication, description, retired
            FROM endpoint_rules
            WHERE NOT retired
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_rules", e))?;

        rows.iter()
            .map(rule_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("active_rules", e))
    }

    #[instrument(skip(self), err)]
    async fn active_bindings(&self) -> Result<Vec<RuleBindingRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT b.rule_id, b.permission_key, b.enforced, b.retired
            FROM rule_bindings b
            JOIN endpoint_rules r ON r.id = b.rule_id
            WHERE NOT b.retired AND NOT r.retired
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_bindings", e))?;

        rows.iter()
            .map(binding_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("active_bindings", e))
    }

    #[instrument(skip(self), err)]
    async fn active_permission_keys(&self) -> Result<Vec<PermissionKeyRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, display_name, parent_id, sort_order, retired
            FROM permission_keys
            WHERE NOT retired
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_permission_keys", e))?;

        rows.iter()
            .map(permission_key_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("active_permission_keys", e))
    }

    #[instrument(skip(self), err)]
    async fn active_roles(&self) -> Result<Vec<RoleRow>, StoreError> {
        let rows = sqlx::query("SELECT id, name, status, retired FROM roles WHERE NOT retired")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_roles", e))?;

        rows.iter()
            .map(role_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("active_roles", e))
    }

    #[instrument(skip(self), fields(rule_id = %id), err)]
    async fn rule(&self, id: RuleId) -> Result<Option<EndpointRuleRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, path, method, require_authentication, description, retired
            FROM endpoint_rules
            WHERE id = $1 AND NOT retired
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rule", e))?;

        row.as_ref()
            .map(rule_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("rule", e))
    }

    #[instrument(skip(self), fields(permission_key_id = %id), err)]
    async fn permission_key(&self, id: PermissionKeyId) -> Result<Option<PermissionKeyRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, key, display_name, parent_id, sort_order, retired
            FROM permission_keys
            WHERE id = $1 AND NOT retired
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission_key", e))?;

        row.as_ref()
            .map(permission_key_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("permission_key", e))
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn role(&self, id: RoleId) -> Result<Option<RoleRow>, StoreError> {
        let row = sqlx::query("SELECT id, name, status, retired FROM roles WHERE id = $1 AND NOT retired")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role", e))?;

        row.as_ref()
            .map(role_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("role", e))
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<RoleGrantRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role_id, permission_key, retired
            FROM role_grants
            WHERE role_id = $1 AND NOT retired
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_grants", e))?;

        rows.iter()
            .map(grant_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("role_grants", e))
    }

    #[instrument(skip(self, row, bindings), fields(rule_id = %row.id, bindings = bindings.len()), err)]
    async fn insert_rule(&self, row: EndpointRuleRow, bindings: Vec<RuleBindingRow>) -> Result<(), StoreError> {
        if let Some(stray) = bindings.iter().find(|b| b.rule_id != row.id) {
            return Err(DomainError::validation(format!(
                "binding of '{}' names rule {}, not {}",
                stray.permission_key, stray.rule_id, row.id
            ))
            .into());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_rule", e))?;

        sqlx::query(
            r#"
            INSERT INTO endpoint_rules
                (id, path, method, normalized_path, require_authentication, description, retired)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(&row.path)
        .bind(row.method.to_ascii_uppercase())
        .bind(normalize_path(&row.path))
        .bind(row.require_authentication)
        .bind(&row.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_rule", e))?;

        for binding in &bindings {
            sqlx::query(
                r#"
                INSERT INTO rule_bindings (rule_id, permission_key, enforced, retired)
                VALUES ($1, $2, $3, FALSE)
                ON CONFLICT (rule_id, permission_key) WHERE NOT retired
                DO UPDATE SET enforced = EXCLUDED.enforced
                "#,
            )
            .bind(row.id.as_uuid())
            .bind(binding.permission_key.as_str())
            .bind(binding.enforced)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_rule", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("insert_rule", e))
    }

    #[instrument(skip(self, row), fields(rule_id = %row.id), err)]
    async fn update_rule(&self, row: EndpointRuleRow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE endpoint_rules
            SET path = $2, method = $3, normalized_path = $4,
                require_authentication = $5, description = $6, updated_at = NOW()
            WHERE id = $1 AND NOT retired
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(&row.path)
        .bind(row.method.to_ascii_uppercase())
        .bind(normalize_path(&row.path))
        .bind(row.require_authentication)
        .bind(&row.description)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_rule", e))?;

        require_affected(result.rows_affected(), || format!("rule {}", row.id))
    }

    #[instrument(skip(self), fields(rule_id = %id), err)]
    async fn retire_rule(&self, id: RuleId) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("retire_rule", e))?;

        let result = sqlx::query(
            "UPDATE endpoint_rules SET retired = TRUE, updated_at = NOW() WHERE id = $1 AND NOT retired",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retire_rule", e))?;
        require_affected(result.rows_affected(), || format!("rule {id}"))?;

        sqlx::query("UPDATE rule_bindings SET retired = TRUE WHERE rule_id = $1 AND NOT retired")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("retire_rule", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("retire_rule", e))
    }

    #[instrument(skip(self, row), fields(rule_id = %row.rule_id, key = %row.permission_key), err)]
    async fn upsert_binding(&self, row: RuleBindingRow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rule_bindings (rule_id, permission_key, enforced, retired)
            SELECT $1, $2, $3, FALSE
            WHERE EXISTS (SELECT 1 FROM endpoint_rules WHERE id = $1 AND NOT retired)
            ON CONFLICT (rule_id, permission_key) WHERE NOT retired
            DO UPDATE SET enforced = EXCLUDED.enforced
            "#,
        )
        .bind(row.rule_id.as_uuid())
        .bind(row.permission_key.as_str())
        .bind(row.enforced)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_binding", e))?;

        require_affected(result.rows_affected(), || format!("rule {}", row.rule_id))
    }

    #[instrument(skip(self), fields(rule_id = %rule_id, key = %key), err)]
    async fn retire_binding(&self, rule_id: RuleId, key: &PermissionKey) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE rule_bindings SET retired = TRUE
            WHERE rule_id = $1 AND permission_key = $2 AND NOT retired
            "#,
        )
        .bind(rule_id.as_uuid())
        .bind(key.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("retire_binding", e))?;

        require_affected(result.rows_affected(), || {
            format!("binding of '{key}' on rule {rule_id}")
        })
    }

    #[instrument(skip(self, row), fields(key = %row.key), err)]
    async fn insert_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_permission_key", e))?;

        let catalog = Self::active_catalog(&mut tx).await?;
        catalog.check_unique_key(&row.key, None)?;
        catalog.check_placement(None, row.parent_id, row.sort_order)?;

        sqlx::query(
            r#"
            INSERT INTO permission_keys (id, key, display_name, parent_id, sort_order, retired)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(row.key.as_str())
        .bind(&row.display_name)
        .bind(row.parent_id.map(|p| *p.as_uuid()))
        .bind(row.sort_order)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_permission_key", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_permission_key", e))
    }

    #[instrument(skip(self, row), fields(permission_key_id = %row.id), err)]
    async fn update_permission_key(&self, row: PermissionKeyRow) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_permission_key", e))?;

        let catalog = Self::active_catalog(&mut tx).await?;
        if catalog.get(&row.id).is_none() {
            return Err(DomainError::not_found(format!("permission key {}", row.id)).into());
        }
        catalog.check_placement(Some(row.id), row.parent_id, row.sort_order)?;

        sqlx::query(
            r#"
            UPDATE permission_keys
            SET display_name = $2, parent_id = $3, sort_order = $4, updated_at = NOW()
            WHERE id = $1 AND NOT retired
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(&row.display_name)
        .bind(row.parent_id.map(|p| *p.as_uuid()))
        .bind(row.sort_order)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_permission_key", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_permission_key", e))
    }

    #[instrument(skip(self), fields(permission_key_id = %id), err)]
    async fn retire_permission_key(&self, id: PermissionKeyId) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("retire_permission_key", e))?;

        let key: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE permission_keys SET retired = TRUE, updated_at = NOW()
            WHERE id = $1 AND NOT retired
            RETURNING key
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("retire_permission_key", e))?;
        let key = key.ok_or_else(|| DomainError::not_found(format!("permission key {id}")))?;

        sqlx::query("UPDATE rule_bindings SET retired = TRUE WHERE permission_key = $1 AND NOT retired")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("retire_permission_key", e))?;
        sqlx::query("UPDATE role_grants SET retired = TRUE WHERE permission_key = $1 AND NOT retired")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("retire_permission_key", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("retire_permission_key", e))
    }

    #[instrument(skip(self, row), fields(role_id = %row.id), err)]
    async fn insert_role(&self, row: RoleRow) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO roles (id, name, status, retired) VALUES ($1, $2, $3, FALSE)")
            .bind(row.id.as_uuid())
            .bind(&row.name)
            .bind(row.status.to_string())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    #[instrument(skip(self, row), fields(role_id = %row.id), err)]
    async fn update_role(&self, row: RoleRow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE roles SET name = $2, status = $3, updated_at = NOW()
            WHERE id = $1 AND NOT retired
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(&row.name)
        .bind(row.status.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        require_affected(result.rows_affected(), || format!("role {}", row.id))
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn retire_role(&self, id: RoleId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE roles SET retired = TRUE, updated_at = NOW() WHERE id = $1 AND NOT retired",
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("retire_role", e))?;

        require_affected(result.rows_affected(), || format!("role {id}"))
    }

    #[instrument(skip(self, row), fields(role_id = %row.role_id, key = %row.permission_key), err)]
    async fn grant(&self, row: RoleGrantRow) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("grant", e))?;

        let role_active = sqlx::query("SELECT 1 FROM roles WHERE id = $1 AND NOT retired FOR SHARE")
            .bind(row.role_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("grant", e))?
            .is_some();
        if !role_active {
            return Err(DomainError::not_found(format!("role {}", row.role_id)).into());
        }

        sqlx::query(
            r#"
            INSERT INTO role_grants (role_id, permission_key, retired)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (role_id, permission_key) WHERE NOT retired DO NOTHING
            "#,
        )
        .bind(row.role_id.as_uuid())
        .bind(row.permission_key.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("grant", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("grant", e))
    }

    #[instrument(skip(self), fields(role_id = %role_id, key = %key), err)]
    async fn revoke(&self, role_id: RoleId, key: &PermissionKey) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE role_grants SET retired = TRUE
            WHERE role_id = $1 AND permission_key = $2 AND NOT retired
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(key.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke", e))?;

        require_affected(result.rows_affected(), || {
            format!("grant of '{key}' to role {role_id}")
        })
    }
}

fn require_affected(rows: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(DomainError::not_found(what()).into());
    }
    Ok(())
}

fn rule_from_row(row: &PgRow) -> Result<EndpointRuleRow, sqlx::Error> {
    Ok(EndpointRuleRow {
        id: RuleId::from_uuid(row.try_get("id")?),
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        require_authentication: row.try_get("require_authentication")?,
        description: row.try_get("description")?,
        retired: row.try_get("retired")?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<RuleBindingRow, sqlx::Error> {
    let key: String = row.try_get("permission_key")?;
    Ok(RuleBindingRow {
        rule_id: RuleId::from_uuid(row.try_get("rule_id")?),
        permission_key: PermissionKey::new(key),
        enforced: row.try_get("enforced")?,
        retired: row.try_get("retired")?,
    })
}

fn permission_key_from_row(row: &PgRow) -> Result<PermissionKeyRow, sqlx::Error> {
    let key: String = row.try_get("key")?;
    let parent: Option<uuid::Uuid> = row.try_get("parent_id")?;
    Ok(PermissionKeyRow {
        id: PermissionKeyId::from_uuid(row.try_get("id")?),
        key: PermissionKey::new(key),
        display_name: row.try_get("display_name")?,
        parent_id: parent.map(PermissionKeyId::from_uuid),
        sort_order: row.try_get("sort_order")?,
        retired: row.try_get("retired")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<RoleRow, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status: RoleStatus = status.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(RoleRow {
        id: RoleId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        status,
        retired: row.try_get("retired")?,
    })
}

fn grant_from_row(row: &PgRow) -> Result<RoleGrantRow, sqlx::Error> {
    let key: String = row.try_get("permission_key")?;
    Ok(RoleGrantRow {
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        permission_key: PermissionKey::new(key),
        retired: row.try_get("retired")?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => match db_err.constraint() {
                    Some(SIBLING_ORDER_CONSTRAINT) => DomainError::ordering(msg).into(),
                    _ => DomainError::duplicate(msg).into(),
                },
                Some("23503") => DomainError::not_found(msg).into(),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(operation.to_string()),
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
