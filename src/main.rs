//! 远程命令执行服务主入口

use remote_exec::{
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::{InMemoryProfileRepository, PgProfileRepository, ProfileRepository},
    routes,
    services::{ExecSettings, LocalKeyStore, ServerService},
    ssh::SshConnector,
    telemetry,
};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("remote-exec {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(env) = std::env::var("REXEC_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "remote-exec starting...");

    // 3. 档案仓库：配置了数据库则使用 PostgreSQL，否则使用内存仓库
    let (db_pool, profiles) = match &config.database.url {
        Some(url) => {
            let pool = db::connect(url, &config.database).await?;
            (
                Some(pool.clone()),
                Arc::new(PgProfileRepository::new(pool)) as Arc<dyn ProfileRepository>,
            )
        }
        None => {
            tracing::warn!("No database configured - server profiles are kept in memory only");
            (
                None,
                Arc::new(InMemoryProfileRepository::new()) as Arc<dyn ProfileRepository>,
            )
        }
    };

    // 4. 私钥存储
    let key_store = Arc::new(LocalKeyStore::new(&config.key_store.base_path));
    key_store.health_check().await?;
    tracing::info!(path = %key_store.base_path().display(), "Key store ready");

    // 5. SSH 连接器与编排服务
    let connector = SshConnector::from_config(&config.ssh).await?;
    let server_service = Arc::new(ServerService::new(
        profiles,
        key_store.clone(),
        connector,
        ExecSettings::from_config(&config.ssh),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        server_service,
        key_store,
        db: db_pool,
    });

    // 6. 构建路由
    let app = routes::create_router(app_state);

    // 7. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 8. 优雅关闭
    let shutdown_timeout = config.server.graceful_shutdown_timeout_secs;
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = shutdown_deadline(shutdown_timeout) => {
            tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 收到关闭信号后开始计时，超时则强制退出
async fn shutdown_deadline(timeout_secs: u64) {
    shutdown_signal().await;
    tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
}

/// 打印帮助信息
fn print_help() {
    println!("remote-exec {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: remote-exec [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 REXEC_ 前缀的环境变量完成，例如:");
    println!("  REXEC_SERVER__ADDR=0.0.0.0:3000");
    println!("  REXEC_DATABASE__URL=postgres://...");
    println!("  REXEC_KEY_STORE__BASE_PATH=./data/keys");
    println!("  REXEC_SSH__CONNECT_TIMEOUT_SECS=10");
    println!("  可用选项请参考 .env.example");
}
