//! Shared Postgres test harness (mirrors the teacher's
//! `tests/common/harness.rs`: one container started on first use, reused by
//! every test in the binary, migrations run once).

use netraven_core::catalog::Catalog;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _container: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Self {
        let container = Postgres::default()
            .start()
            .await
            .expect("failed to start Postgres container");
        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("container port");
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url).await.expect("connect for migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        pool.close().await;

        Self { db_url, _container: container }
    }

    async fn get() -> &'static Self {
        SHARED_INFRA.get_or_init(Self::init).await
    }
}

/// Fresh pool against the shared container, truncating every table so tests
/// don't see each other's rows (cheaper than a container per test).
pub async fn test_catalog() -> Catalog {
    let infra = SharedInfra::get().await;
    let pool = PgPool::connect(&infra.db_url).await.expect("connect test pool");
    sqlx::query(
        "TRUNCATE device_sub_results, snapshot_references, snapshots, queue_items, \
         dispatcher_lease, log_entries, job_runs, schedules, credential_tag_bindings, \
         credentials, device_tags, jobs, tags, devices, encryption_keys RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .expect("truncate tables between tests");
    Catalog::new(pool)
}
