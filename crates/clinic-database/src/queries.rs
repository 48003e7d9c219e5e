//! 数据库结构初始化

use crate::connection::DatabasePool;
use clinic_core::Result;

/// 建表语句，按外键依赖顺序排列
const TABLES: &[(&str, &str)] = &[
    (
        "patients",
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id BIGINT PRIMARY KEY,
            mrn VARCHAR(64) UNIQUE NOT NULL,
            name VARCHAR(255) NOT NULL
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            department_id BIGINT
        )
        "#,
    ),
    (
        "rooms",
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id BIGINT PRIMARY KEY,
            title VARCHAR(255) NOT NULL
        )
        "#,
    ),
    (
        "visit_types",
        r#"
        CREATE TABLE IF NOT EXISTS visit_types (
            id BIGINT PRIMARY KEY,
            title VARCHAR(255) UNIQUE NOT NULL
        )
        "#,
    ),
    (
        "billing_codes",
        r#"
        CREATE TABLE IF NOT EXISTS billing_codes (
            id BIGINT PRIMARY KEY,
            code VARCHAR(32) NOT NULL,
            title VARCHAR(255) NOT NULL,
            price NUMERIC(12, 2) NOT NULL
        )
        "#,
    ),
    (
        "service_types",
        r#"
        CREATE TABLE IF NOT EXISTS service_types (
            id BIGINT PRIMARY KEY,
            kind VARCHAR(20) NOT NULL,
            title VARCHAR(255) NOT NULL,
            billing_code_id BIGINT NOT NULL REFERENCES billing_codes(id)
        )
        "#,
    ),
    (
        "service_type_supplies",
        r#"
        CREATE TABLE IF NOT EXISTS service_type_supplies (
            service_type_id BIGINT NOT NULL REFERENCES service_types(id),
            supply_id BIGINT NOT NULL,
            billing_code_id BIGINT NOT NULL REFERENCES billing_codes(id),
            PRIMARY KEY (service_type_id, supply_id)
        )
        "#,
    ),
    (
        "encounters",
        r#"
        CREATE TABLE IF NOT EXISTS encounters (
            id BIGSERIAL PRIMARY KEY,
            patient_id BIGINT NOT NULL REFERENCES patients(id),
            provider_id BIGINT NOT NULL REFERENCES users(id),
            department_id BIGINT,
            room_id BIGINT NOT NULL REFERENCES rooms(id),
            visit_type_id BIGINT NOT NULL REFERENCES visit_types(id),
            status VARCHAR(20) NOT NULL DEFAULT 'SCHEDULED',
            check_in TIMESTAMP WITH TIME ZONE NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "encounter_charts",
        r#"
        CREATE TABLE IF NOT EXISTS encounter_charts (
            id BIGSERIAL PRIMARY KEY,
            encounter_id BIGINT UNIQUE NOT NULL REFERENCES encounters(id),
            locked BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "queues",
        r#"
        CREATE TABLE IF NOT EXISTS queues (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) UNIQUE NOT NULL,
            kind VARCHAR(20) NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "queue_members",
        r#"
        CREATE TABLE IF NOT EXISTS queue_members (
            queue_id BIGINT NOT NULL REFERENCES queues(id),
            encounter_id BIGINT NOT NULL,
            position BIGINT NOT NULL,
            UNIQUE (queue_id, encounter_id)
        )
        "#,
    ),
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id BIGSERIAL PRIMARY KEY,
            kind VARCHAR(20) NOT NULL,
            chart_id BIGINT NOT NULL REFERENCES encounter_charts(id),
            patient_id BIGINT NOT NULL REFERENCES patients(id),
            requested_by BIGINT NOT NULL REFERENCES users(id),
            status VARCHAR(20) NOT NULL DEFAULT 'ORDERED',
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
    (
        "line_items",
        r#"
        CREATE TABLE IF NOT EXISTS line_items (
            id BIGSERIAL PRIMARY KEY,
            order_id BIGINT NOT NULL REFERENCES orders(id),
            kind VARCHAR(20) NOT NULL,
            chart_id BIGINT NOT NULL REFERENCES encounter_charts(id),
            service_type_id BIGINT REFERENCES service_types(id),
            referral_kind VARCHAR(16),
            referral_provider_id BIGINT REFERENCES users(id),
            referral_facility VARCHAR(255),
            status VARCHAR(20) NOT NULL DEFAULT 'ORDERED',
            notes TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "payments",
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id BIGSERIAL PRIMARY KEY,
            line_item_id BIGINT NOT NULL REFERENCES line_items(id),
            patient_id BIGINT NOT NULL REFERENCES patients(id),
            billing_code_id BIGINT NOT NULL REFERENCES billing_codes(id),
            amount NUMERIC(12, 2) NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'NOTPAID',
            invoice_no VARCHAR(64),
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            paid_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
    (
        "payment_waivers",
        r#"
        CREATE TABLE IF NOT EXISTS payment_waivers (
            id BIGSERIAL PRIMARY KEY,
            payment_id BIGINT NOT NULL REFERENCES payments(id),
            patient_id BIGINT NOT NULL REFERENCES patients(id),
            requested_by BIGINT NOT NULL REFERENCES users(id),
            approved BOOLEAN,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            decided_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_queue_members_position ON queue_members(queue_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_encounters_check_in ON encounters(check_in)",
    "CREATE INDEX IF NOT EXISTS idx_orders_chart_kind ON orders(chart_id, kind, status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_open ON orders(chart_id, kind) WHERE status = 'ORDERED'",
    "CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(kind, status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_line_items_order_id ON line_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_line_item_id ON payments(line_item_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_patient_id ON payments(patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_payment_waivers_payment_id ON payment_waivers(payment_id)",
];

/// 数据库结构操作
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        for (name, ddl) in TABLES {
            sqlx::query(ddl).execute(pool).await?;
            tracing::debug!("Ensured table {}", name);
        }

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        for index_sql in INDEXES {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}
