mod cluster_cmd;
mod config;
mod deployment_cmd;
mod serve_cmd;
#[cfg(test)]
mod test_util;
mod worker_cmd;

use clap::{Parser, Subcommand};

use hypervisor_db::pool;

use config::HypervisorConfig;

#[derive(Parser)]
#[command(name = "hypervisor", about = "MLOps deployment scheduler")]
struct Cli {
    /// Database URL (overrides HYPERVISOR_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the hypervisor database (creates it if missing, runs migrations)
    DbInit,
    /// Cluster management
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Deployment management
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },
    /// Run the scheduler worker pool until interrupted
    Worker {
        /// Maximum number of deployments processed concurrently
        #[arg(long, default_value_t = 8)]
        max_concurrency: usize,
        /// Poll interval in milliseconds when the queue is empty
        #[arg(long, default_value_t = 200)]
        poll_interval_ms: u64,
    },
    /// Run the HTTP API surface
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Register a new cluster
    Create {
        /// Cluster name
        name: String,
        /// Total RAM capacity (MB)
        #[arg(long)]
        ram: i32,
        /// Total CPU capacity (millicores)
        #[arg(long)]
        cpu: i32,
        /// Total GPU capacity (count)
        #[arg(long, default_value_t = 0)]
        gpu: i32,
        /// User id creating this cluster
        #[arg(long)]
        created_by: i64,
    },
    /// List all clusters with their current allocation
    List,
    /// Show a single cluster's details
    Get {
        /// Cluster id
        id: i64,
    },
}

#[derive(Subcommand)]
enum DeploymentCommands {
    /// Submit a deployment for scheduling
    Create {
        /// Docker image path
        docker_image_path: String,
        /// Required RAM (MB)
        #[arg(long)]
        ram: i32,
        /// Required CPU (millicores)
        #[arg(long)]
        cpu: i32,
        /// Required GPU (count)
        #[arg(long, default_value_t = 0)]
        gpu: i32,
        /// Priority: low, medium, or high
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Target cluster id
        #[arg(long)]
        cluster_id: i64,
        /// User id creating this deployment
        #[arg(long)]
        created_by: i64,
        /// Maximum scheduling attempts before the deployment is marked failed
        #[arg(long, default_value_t = 20)]
        retry_max: i32,
    },
    /// Add a dependency edge: `dependent` depends on `dependency`
    AddDependency {
        /// Dependent deployment id
        dependent_id: i64,
        /// Dependency deployment id
        dependency_id: i64,
    },
    /// List deployments, optionally filtered by cluster and/or status
    List {
        /// Filter by cluster id
        #[arg(long)]
        cluster_id: Option<i64>,
        /// Filter by status: pending, running, completed, or failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a single deployment's details
    Get {
        /// Deployment id
        id: i64,
    },
    /// Mark a running deployment complete, releasing its resources
    Complete {
        /// Deployment id
        id: i64,
    },
}

/// Execute the `hypervisor db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = HypervisorConfig::resolve(cli_db_url)?;

    println!("Initializing hypervisor database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("hypervisor db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::DbInit = cli.command {
        cmd_db_init(cli.database_url.as_deref()).await?;
        return Ok(());
    }

    let resolved = HypervisorConfig::resolve(cli.database_url.as_deref())?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let result = run_command(cli.command, db_pool.clone()).await;

    db_pool.close().await;

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(command: Commands, pool: sqlx::PgPool) -> anyhow::Result<()> {
    match command {
        Commands::DbInit => unreachable!("handled before pool creation"),
        Commands::Cluster { command } => match command {
            ClusterCommands::Create {
                name,
                ram,
                cpu,
                gpu,
                created_by,
            } => {
                cluster_cmd::run_create(&pool, &name, ram, cpu, gpu, created_by).await?;
            }
            ClusterCommands::List => {
                cluster_cmd::run_list(&pool).await?;
            }
            ClusterCommands::Get { id } => {
                cluster_cmd::run_get(&pool, id).await?;
            }
        },
        Commands::Deployment { command } => match command {
            DeploymentCommands::Create {
                docker_image_path,
                ram,
                cpu,
                gpu,
                priority,
                cluster_id,
                created_by,
                retry_max,
            } => {
                deployment_cmd::run_create(
                    &pool,
                    &docker_image_path,
                    ram,
                    cpu,
                    gpu,
                    &priority,
                    cluster_id,
                    created_by,
                    retry_max,
                )
                .await?;
            }
            DeploymentCommands::AddDependency {
                dependent_id,
                dependency_id,
            } => {
                deployment_cmd::run_add_dependency(&pool, dependent_id, dependency_id).await?;
            }
            DeploymentCommands::List { cluster_id, status } => {
                deployment_cmd::run_list(&pool, cluster_id, status.as_deref()).await?;
            }
            DeploymentCommands::Get { id } => {
                deployment_cmd::run_get(&pool, id).await?;
            }
            DeploymentCommands::Complete { id } => {
                deployment_cmd::run_complete(&pool, id).await?;
            }
        },
        Commands::Worker {
            max_concurrency,
            poll_interval_ms,
        } => {
            worker_cmd::run_worker(pool, max_concurrency, poll_interval_ms).await?;
        }
        Commands::Serve { bind, port } => {
            serve_cmd::run_serve(pool, &bind, port).await?;
        }
    }

    Ok(())
}
