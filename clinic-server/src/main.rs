//! 诊所工作流服务主程序

use anyhow::{Context, Result};
use clap::Parser;
use clinic_admin::{init_tracing, ClinicConfig, ConfigManager};
use clinic_database::{DatabasePool, DatabaseQueries, PgClinicStore};
use clinic_workflow::ClinicWorkflow;
use tracing::{error, info};

/// 诊所服务命令行参数
#[derive(Parser, Debug)]
#[command(name = "clinic-server")]
#[command(about = "诊所分诊队列与医嘱工作流服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/clinic.toml")]
    config: String,

    /// 日志级别，未指定时使用配置中的级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 只初始化数据库结构后退出
    #[arg(long)]
    migrate_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(&args.config)?;
    // 运行时尚未创建，以阻塞方式读取线程数
    let worker_threads = manager.blocking_config().server.worker_threads;
    let runtime = build_runtime(manager.config_path(), worker_threads)?;

    runtime.block_on(async move {
        let config = manager.get_config().await;
        init_tracing(&config.logging, args.log_level.as_deref())?;

        info!("Starting {}...", config.server.name);
        if let Err(e) = serve(&config, args.migrate_only).await {
            error!("Clinic server stopped with error: {:#}", e);
            return Err(e);
        }
        Ok(())
    })
}

fn build_runtime(config_path: &str, worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    builder
        .build()
        .with_context(|| format!("Failed to build runtime for {}", config_path))
}

async fn serve(config: &ClinicConfig, migrate_only: bool) -> Result<()> {
    let pool = DatabasePool::connect(&config.pool_settings())
        .await
        .context("Failed to connect to database")?;
    DatabaseQueries::new(&pool)
        .create_tables()
        .await
        .context("Failed to initialise database schema")?;

    if migrate_only {
        info!("Database schema is up to date");
        pool.close().await;
        return Ok(());
    }

    let workflow = ClinicWorkflow::new(PgClinicStore::new(pool.clone()), config.workflow_settings())?;

    let overview = workflow.overview().await?;
    info!(
        "Clinic workflow ready: {} queues, {} waiting encounters",
        overview.total_queues, overview.waiting_encounters
    );

    let reaper = workflow.reaper().spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down clinic server");
    reaper.abort();
    pool.close().await;
    Ok(())
}
