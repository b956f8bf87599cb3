//! Postgres store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rda_id::{ClusterId, InstanceId, NodeId, ShardId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{DbConfig, Store, StoreError, StoreResult};
use crate::model::{
    Cluster, ClusterRef, ClusterStatus, ComputeInstance, ComputeNode, NewCluster, Shard,
    ShardAssignment,
};

const CLUSTER_COLUMNS: &str = "identifier, external_identifier, data_set_identifier, data_source, status, created_at, updated_at";

const INSTANCE_COLUMNS: &str =
    "identifier, node_identifier, address, available_memory, shard_identifier, loaded_record_count";

/// Store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Run pending migrations.
    ///
    /// Note: In production, migrations should be run as part of deployment.
    /// This method uses runtime migration loading.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/cluster-service/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    async fn fetch_clusters(&self, sql: &str, binds: &[&str]) -> StoreResult<Vec<Cluster>> {
        let mut query = sqlx::query_as::<_, ClusterRow>(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Cluster::try_from)
            .collect()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_node(&self, id: &NodeId) -> StoreResult<Option<ComputeNode>> {
        let row =
            sqlx::query("SELECT identifier, created_at FROM compute_nodes WHERE identifier = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| -> StoreResult<ComputeNode> {
            Ok(ComputeNode {
                identifier: decode_node_id(row.try_get("identifier")?)?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn insert_node(&self, node: &ComputeNode) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO compute_nodes (identifier, created_at) VALUES ($1, $2) ON CONFLICT (identifier) DO NOTHING",
        )
        .bind(node.identifier.as_str())
        .bind(node.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_instances(&self) -> StoreResult<Vec<ComputeInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM compute_instances ORDER BY identifier");
        sqlx::query_as::<_, InstanceRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ComputeInstance::try_from)
            .collect()
    }

    async fn list_available_instances(&self) -> StoreResult<Vec<ComputeInstance>> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM compute_instances WHERE shard_identifier IS NULL ORDER BY identifier"
        );
        sqlx::query_as::<_, InstanceRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ComputeInstance::try_from)
            .collect()
    }

    async fn insert_instance(&self, instance: &ComputeInstance) -> StoreResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO compute_instances (
                identifier, node_identifier, address, available_memory,
                shard_identifier, loaded_record_count
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identifier) DO NOTHING
            "#,
        )
        .bind(instance.identifier.as_str())
        .bind(instance.node.as_str())
        .bind(&instance.address)
        .bind(to_db_count(instance.available_memory))
        .bind(instance.shard.map(|s| s.to_string()))
        .bind(to_db_count(instance.loaded_record_count))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict(format!(
                "instance '{}' already exists",
                instance.identifier
            )));
        }
        Ok(())
    }

    async fn delete_instance(&self, id: &InstanceId) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM compute_instances WHERE identifier = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn set_loaded_record_count(&self, id: &InstanceId, count: u64) -> StoreResult<()> {
        sqlx::query("UPDATE compute_instances SET loaded_record_count = $1 WHERE identifier = $2")
            .bind(to_db_count(count))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &NewCluster) -> StoreResult<Cluster> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO clusters (
                identifier, external_identifier, data_set_identifier, data_source, status
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CLUSTER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ClusterRow>(&sql)
            .bind(cluster.id.to_string())
            .bind(&cluster.external_id)
            .bind(&cluster.data_set)
            .bind(&cluster.data_source)
            .bind(ClusterStatus::Created.as_str())
            .fetch_one(&mut *tx)
            .await?;

        for plan in &cluster.shards {
            sqlx::query(
                "INSERT INTO shards (identifier, cluster_identifier, instance_identifier) VALUES ($1, $2, $3)",
            )
            .bind(plan.shard.to_string())
            .bind(cluster.id.to_string())
            .bind(plan.instance.as_str())
            .execute(&mut *tx)
            .await?;

            // Row lock plus the NULL guard keeps two transactions from
            // binding the same instance.
            let bound = sqlx::query(
                "UPDATE compute_instances SET shard_identifier = $1 WHERE identifier = $2 AND shard_identifier IS NULL",
            )
            .bind(plan.shard.to_string())
            .bind(plan.instance.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if bound != 1 {
                debug!(
                    instance_id = %plan.instance,
                    "Instance missing or already bound, rolling back"
                );
                return Err(StoreError::Conflict(format!(
                    "instance '{}' is missing or already bound",
                    plan.instance
                )));
            }
        }

        tx.commit().await?;
        Cluster::try_from(row)
    }

    async fn find_cluster(&self, cluster: &ClusterRef) -> StoreResult<Option<Cluster>> {
        let (column, value) = match cluster {
            ClusterRef::Id(id) => ("identifier", id.to_string()),
            ClusterRef::External(external) => ("external_identifier", external.clone()),
        };
        let sql = format!("SELECT {CLUSTER_COLUMNS} FROM clusters WHERE {column} = $1");
        Ok(self.fetch_clusters(&sql, &[value.as_str()]).await?.into_iter().next())
    }

    async fn find_clusters_by_status(&self, status: ClusterStatus) -> StoreResult<Vec<Cluster>> {
        let sql = format!(
            "SELECT {CLUSTER_COLUMNS} FROM clusters WHERE status = $1 ORDER BY created_at, identifier"
        );
        self.fetch_clusters(&sql, &[status.as_str()]).await
    }

    async fn find_cluster_for_data_set(
        &self,
        data_source: &str,
        data_set: &str,
        status: ClusterStatus,
    ) -> StoreResult<Option<Cluster>> {
        let sql = format!(
            r#"
            SELECT {CLUSTER_COLUMNS} FROM clusters
            WHERE data_source = $1 AND data_set_identifier = $2 AND status = $3
            ORDER BY created_at DESC, identifier DESC
            LIMIT 1
            "#
        );
        Ok(self
            .fetch_clusters(&sql, &[data_source, data_set, status.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn cluster_shards(&self, id: &ClusterId) -> StoreResult<Vec<ShardAssignment>> {
        sqlx::query_as::<_, ShardJoinRow>(
            r#"
            SELECT
                s.identifier AS shard_identifier,
                s.cluster_identifier,
                s.instance_identifier,
                i.node_identifier,
                i.address,
                i.available_memory,
                i.shard_identifier AS bound_shard_identifier,
                i.loaded_record_count
            FROM shards s
            LEFT JOIN compute_instances i
                ON i.identifier = s.instance_identifier AND i.shard_identifier = s.identifier
            WHERE s.cluster_identifier = $1
            ORDER BY s.identifier
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ShardAssignment::try_from)
        .collect()
    }

    async fn transition_cluster(
        &self,
        id: &ClusterId,
        expected: Option<ClusterStatus>,
        next: ClusterStatus,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE clusters
            SET status = $1, updated_at = now()
            WHERE identifier = $2 AND ($3::text IS NULL OR status = $3)
            "#,
        )
        .bind(next.as_str())
        .bind(id.to_string())
        .bind(expected.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn end_live_clusters(&self) -> StoreResult<u64> {
        let ended = sqlx::query(
            r#"
            UPDATE clusters
            SET status = 'ended', updated_at = now()
            WHERE status NOT IN ('ended', 'failed')
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(ended)
    }
}

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_count(column: &str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn decode_node_id(value: String) -> StoreResult<NodeId> {
    NodeId::parse(value).map_err(|e| StoreError::Corrupt(format!("node identifier: {e}")))
}

fn decode_instance_id(value: String) -> StoreResult<InstanceId> {
    InstanceId::parse(value).map_err(|e| StoreError::Corrupt(format!("instance identifier: {e}")))
}

fn decode_shard_id(value: &str) -> StoreResult<ShardId> {
    ShardId::parse(value)
        .map_err(|e| StoreError::Corrupt(format!("shard identifier '{value}': {e}")))
}

fn decode_cluster_id(value: &str) -> StoreResult<ClusterId> {
    ClusterId::parse(value)
        .map_err(|e| StoreError::Corrupt(format!("cluster identifier '{value}': {e}")))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug)]
struct ClusterRow {
    identifier: String,
    external_identifier: String,
    data_set_identifier: String,
    data_source: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ClusterRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            identifier: row.try_get("identifier")?,
            external_identifier: row.try_get("external_identifier")?,
            data_set_identifier: row.try_get("data_set_identifier")?,
            data_source: row.try_get("data_source")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ClusterRow> for Cluster {
    type Error = StoreError;

    fn try_from(row: ClusterRow) -> StoreResult<Self> {
        Ok(Self {
            id: decode_cluster_id(&row.identifier)?,
            external_id: row.external_identifier,
            data_set: row.data_set_identifier,
            data_source: row.data_source,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct InstanceRow {
    identifier: String,
    node_identifier: String,
    address: String,
    available_memory: i64,
    shard_identifier: Option<String>,
    loaded_record_count: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InstanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            identifier: row.try_get("identifier")?,
            node_identifier: row.try_get("node_identifier")?,
            address: row.try_get("address")?,
            available_memory: row.try_get("available_memory")?,
            shard_identifier: row.try_get("shard_identifier")?,
            loaded_record_count: row.try_get("loaded_record_count")?,
        })
    }
}

impl TryFrom<InstanceRow> for ComputeInstance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> StoreResult<Self> {
        Ok(Self {
            identifier: decode_instance_id(row.identifier)?,
            node: decode_node_id(row.node_identifier)?,
            address: row.address,
            available_memory: from_db_count("available_memory", row.available_memory)?,
            shard: row.shard_identifier.as_deref().map(decode_shard_id).transpose()?,
            loaded_record_count: from_db_count("loaded_record_count", row.loaded_record_count)?,
        })
    }
}

#[derive(Debug)]
struct ShardJoinRow {
    shard_identifier: String,
    cluster_identifier: String,
    instance_identifier: String,
    node_identifier: Option<String>,
    address: Option<String>,
    available_memory: Option<i64>,
    bound_shard_identifier: Option<String>,
    loaded_record_count: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ShardJoinRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            shard_identifier: row.try_get("shard_identifier")?,
            cluster_identifier: row.try_get("cluster_identifier")?,
            instance_identifier: row.try_get("instance_identifier")?,
            node_identifier: row.try_get("node_identifier")?,
            address: row.try_get("address")?,
            available_memory: row.try_get("available_memory")?,
            bound_shard_identifier: row.try_get("bound_shard_identifier")?,
            loaded_record_count: row.try_get("loaded_record_count")?,
        })
    }
}

impl TryFrom<ShardJoinRow> for ShardAssignment {
    type Error = StoreError;

    fn try_from(row: ShardJoinRow) -> StoreResult<Self> {
        let shard = Shard {
            identifier: decode_shard_id(&row.shard_identifier)?,
            cluster: decode_cluster_id(&row.cluster_identifier)?,
            instance: decode_instance_id(row.instance_identifier.clone())?,
        };

        // The LEFT JOIN yields NULL instance columns once the instance is gone.
        let instance = match (row.node_identifier, row.address) {
            (Some(node), Some(address)) => Some(ComputeInstance {
                identifier: shard.instance.clone(),
                node: decode_node_id(node)?,
                address,
                available_memory: from_db_count(
                    "available_memory",
                    row.available_memory.unwrap_or_default(),
                )?,
                shard: row
                    .bound_shard_identifier
                    .as_deref()
                    .map(decode_shard_id)
                    .transpose()?,
                loaded_record_count: from_db_count(
                    "loaded_record_count",
                    row.loaded_record_count.unwrap_or_default(),
                )?,
            }),
            _ => None,
        };

        Ok(Self { shard, instance })
    }
}
