use anyhow::Context;
use clap::Parser;
use filler_core::orders_file::{read_orders, read_work_items};
use filler_core::{
    DriverConfig, GeneratorConfig, LoaderConfig, OrderGenerator, RandomFillSizer, RetryConfig,
};
use filler_db::{
    ConnectionPool, DatabaseConfig, FillService, LedgerConnection, ManageConnection,
    MemoryLedger, MemoryManager, PgConnectionManager, PoolConfig, RetryPolicy,
};
use filler_driver::{OrderLoader, ParallelFillDriver};
use filler_metrics::{MetricsConfig, MetricsServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Generate synthetic orders, load them into Postgres and fill them concurrently
#[derive(Parser, Debug)]
#[command(name = "order-filler")]
#[command(version)]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", required_unless_present = "dry_run")]
    dsn: Option<String>,

    /// Write a fresh orders file
    #[arg(long)]
    generate: bool,

    /// Insert the orders file into the orders table
    #[arg(long)]
    insert: bool,

    /// Fill every order listed in the orders file
    #[arg(long)]
    fill: bool,

    /// Orders file to write and read [default: orders_1m.csv]
    #[arg(long)]
    orders_file: Option<PathBuf>,

    /// Orders to generate [default: 30000]
    #[arg(long)]
    count: Option<usize>,

    /// Concurrent workers for insert and fill [default: 2]
    #[arg(long)]
    workers: Option<usize>,

    /// Orders per insert transaction [default: 8]
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between fill progress reports [default: 30]
    #[arg(long)]
    report_interval_secs: Option<u64>,

    /// Use an in-process ledger instead of Postgres
    #[arg(long)]
    dry_run: bool,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "FILLER_METRICS_PORT")]
    metrics_port: Option<u16>,
}

/// Settings after applying CLI overrides on top of the environment
struct Settings {
    driver: DriverConfig,
    loader: LoaderConfig,
    generator: GeneratorConfig,
    retry: RetryPolicy,
}

impl Settings {
    fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut driver = DriverConfig::from_env();
        if let Some(workers) = cli.workers {
            driver.workers = workers;
        }
        if let Some(secs) = cli.report_interval_secs {
            driver.report_interval_secs = secs;
        }
        driver.validate()?;

        let mut loader = LoaderConfig::from_env();
        if let Some(batch_size) = cli.batch_size {
            loader.batch_size = batch_size;
        }
        loader.validate()?;

        let mut generator = GeneratorConfig::from_env();
        if let Some(path) = &cli.orders_file {
            generator.orders_file = path.clone();
        }
        if let Some(count) = cli.count {
            generator.total_orders = count;
        }

        Ok(Self {
            driver,
            loader,
            generator,
            retry: RetryPolicy::from_config(&RetryConfig::from_env()),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("order-filler failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::resolve(&cli)?;

    if let Some(port) = cli.metrics_port {
        let server = MetricsServer::install(MetricsConfig::from_env().with_port(port))?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Metrics server error");
            }
        });
    }

    let sizer = Arc::new(RandomFillSizer::from_entropy());
    let workers = settings.driver.workers;

    if cli.dry_run {
        warn!("Dry run: using the in-process ledger, nothing is written to Postgres");
        let (min_connections, max_connections) = settings.driver.pool_bounds();
        let pool = ConnectionPool::connect(
            MemoryManager::new(MemoryLedger::new()),
            PoolConfig {
                min_connections,
                max_connections,
                ..PoolConfig::default()
            },
        )
        .await?;
        let service = Arc::new(FillService::new(pool, settings.retry, sizer));
        return run_phases(&cli, &settings, service).await;
    }

    let dsn = cli
        .dsn
        .clone()
        .context("--dsn or DATABASE_URL is required")?;
    let db_config = DatabaseConfig::from_env(dsn).sized_for_workers(workers);
    let pool_config = db_config.pool_config();
    let manager = PgConnectionManager::from_config(&db_config)?;
    let pool = ConnectionPool::connect(manager, pool_config.clone())
        .await
        .context("failed to open database connection pool")?;
    info!(
        min_connections = pool_config.min_connections,
        max_connections = pool_config.max_connections,
        statement_timeout_ms = db_config.statement_timeout_ms,
        "Database connected"
    );

    let service = Arc::new(FillService::new(pool, settings.retry, sizer));
    run_phases(&cli, &settings, service).await
}

async fn run_phases<M>(
    cli: &Cli,
    settings: &Settings,
    service: Arc<FillService<M>>,
) -> anyhow::Result<()>
where
    M: ManageConnection,
    M::Connection: LedgerConnection,
{
    let result = phases(cli, settings, &service).await;

    match service.summary().await {
        Ok(summary) => info!(
            orders = summary.orders,
            open_orders = summary.open_orders,
            completed_orders = summary.completed_orders,
            fills = summary.fills,
            shares_filled = summary.shares_filled,
            "Ledger summary"
        ),
        Err(e) => warn!(error = %e, "Failed to read ledger summary"),
    }

    service.shutdown().await;
    result
}

async fn phases<M>(
    cli: &Cli,
    settings: &Settings,
    service: &Arc<FillService<M>>,
) -> anyhow::Result<()>
where
    M: ManageConnection,
    M::Connection: LedgerConnection,
{
    service
        .ensure_schema()
        .await
        .context("failed to bootstrap schema")?;

    let path = settings.generator.orders_file.clone();

    if cli.generate {
        let count = settings.generator.total_orders;
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            let mut generator = OrderGenerator::new();
            info!(symbol = generator.symbol(), count, path = %target.display(), "Generating orders");
            generator.write_orders_file(&target, count)
        })
        .await??;
        info!(written, path = %path.display(), "Orders file written");
    }

    if cli.insert {
        let orders = read_path(path.clone(), read_orders).await?;
        let loader = OrderLoader::new(service.clone(), &settings.loader, settings.driver.workers);
        loader.load(orders).await?;
    }

    if cli.fill {
        let items = read_path(path.clone(), read_work_items).await?;
        let driver = ParallelFillDriver::new(service.clone(), settings.driver.clone());
        let report = driver.run(items).await?;
        for failure in report.failures.iter().take(10) {
            error!(item = %failure.item, error = %failure.error, "Order was not filled");
        }
        report.into_result()?;
    }

    Ok(())
}

/// Parse the orders file off the async runtime
async fn read_path<T, F>(path: PathBuf, read: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&std::path::Path) -> filler_core::Result<T> + Send + 'static,
{
    let shown = path.display().to_string();
    let parsed = tokio::task::spawn_blocking(move || read(&path))
        .await?
        .with_context(|| format!("failed to read orders file {shown}"))?;
    Ok(parsed)
}
