mod cli;
mod config;
mod handlers;
mod services;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use clap::{Parser, Subcommand};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::PanelConfig;
use coupon_db::db::init_db;
use coupon_db::repositories::coupon_repo::CouponRepository;
use services::coupon_service::CouponService;
use services::export_service::ExportService;
use services::qr_service::QrService;

#[derive(Clone)]
pub struct AppState {
    pub coupon_service: Arc<CouponService>,
    pub qr_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl AppState {
    pub fn new(pool: sqlx::SqlitePool, config: &PanelConfig) -> Self {
        let qr_service = Arc::new(QrService::new(config.qr_dir.clone(), config.public_base_url.clone()));
        let export_service = Arc::new(ExportService::new(config.export_dir.clone()));
        let coupon_service = Arc::new(CouponService::new(
            CouponRepository::new(pool),
            qr_service,
            export_service,
            config.qr_mode,
            config.max_batch,
        ));

        Self {
            coupon_service,
            qr_dir: config.qr_dir.clone(),
            export_dir: config.export_dir.clone(),
        }
    }
}

#[derive(Parser)]
#[command(name = "coupon-panel")]
#[command(about = "Issue, distribute and redeem discount coupons", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web panel
    Serve,
    /// Generate a batch of coupons from the command line
    Generate {
        /// Number of coupons to issue
        #[arg(long, conflicts_with = "emails")]
        count: Option<String>,
        /// CSV file with one customer email per row
        #[arg(long)]
        emails: Option<PathBuf>,
        /// Client / campaign label
        #[arg(long)]
        client: Option<String>,
        /// Domain label
        #[arg(long)]
        domain: Option<String>,
        /// QR output: none, file or inline
        #[arg(long)]
        qr_mode: Option<String>,
    },
    /// Redeem a coupon code
    Redeem {
        code: String,
    },
    /// List coupons, newest first
    List {
        #[arg(long)]
        client: Option<String>,
    },
    /// Show issued / active / redeemed / expired totals
    Stats {
        #[arg(long)]
        client: Option<String>,
    },
    /// Install the panel as a systemd service
    Install,
}

pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(handlers::index::get_index))
        .route("/health", get(handlers::health))
        .route(
            "/generate_coupons",
            get(handlers::generate::get_generate).post(handlers::generate::post_generate),
        )
        .route(
            "/validate_coupon",
            get(handlers::validate::get_validate).post(handlers::validate::post_validate),
        )
        .route("/history", get(handlers::history::get_history))
        .route("/history/export.csv", get(handlers::history::export_history))
        .route("/delete_coupon", post(handlers::history::delete_coupon))
        .route("/assets/panel.css", get(handlers::assets::panel_css))
        .nest_service("/qr", ServeDir::new(&state.qr_dir))
        .nest_service("/exports", ServeDir::new(&state.export_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::compression::CompressionLayer::new())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(10 * 1024 * 1024)) // 10MB limit
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(tower_http::set_header::SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            axum::http::HeaderValue::from_static("nosniff"),
        ))
        .layer(tower_http::set_header::SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            axum::http::HeaderValue::from_static("DENY"),
        ))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: no .env loaded: {}", e);
    }

    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never(".", "coupon-panel.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "coupon_panel=debug,coupon_db=info,tower_http=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = PanelConfig::from_env()?;
    let pool = init_db(&config.database_url).await?;
    let state = AppState::new(pool, &config);

    match cli.command {
        Commands::Serve => run_server(state, &config).await?,
        Commands::Generate { count, emails, client, domain, qr_mode } => {
            let file = match emails {
                Some(path) => Some(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                None => None,
            };
            cli::generate(
                &state.coupon_service,
                count.as_deref(),
                file.as_deref(),
                client,
                domain,
                qr_mode.as_deref(),
            )
            .await?;
        }
        Commands::Redeem { code } => cli::redeem(&state.coupon_service, &code).await?,
        Commands::List { client } => cli::list(&state.coupon_service, client.as_deref()).await?,
        Commands::Stats { client } => cli::stats(&state.coupon_service, client.as_deref()).await?,
        Commands::Install => cli::install_service()?,
    }

    Ok(())
}

async fn run_server(state: AppState, config: &PanelConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.qr_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.qr_dir.display()))?;
    tokio::fs::create_dir_all(&config.export_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.export_dir.display()))?;

    let app = build_router(state);

    let addr = SocketAddr::new(config.bind_addr, config.port);
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
