use chatbot::{app, config::AppConfig, db, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "chatbot=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    tracing::info!(app = %config.app_name, "starting");
    tracing::info!(auth_enabled = config.auth_enabled, debug = config.debug, "settings loaded");

    let app_state = AppState::init(config).await?;
    let config = app_state.config.clone();

    if config.auth_enabled {
        tracing::info!("checking database connection");
        if db::check_connection(&app_state.db).await {
            tracing::info!("database connection successful");
            db::run_migrations(&app_state.db).await?;
            bootstrap_admin(&app_state).await;
        } else {
            tracing::error!("database connection failed");
            if !config.debug {
                std::process::exit(1);
            }
        }
    }

    let app = app::build_app(app_state);
    app::serve(app, &config.host, config.port).await
}

async fn bootstrap_admin(state: &AppState) {
    let admin = &state.config.admin;
    let Some(password) = admin.password.as_deref() else {
        tracing::warn!("ADMIN_PASSWORD not set, skipping default admin creation");
        return;
    };

    if let Err(e) = state
        .auth
        .store()
        .bootstrap_default_admin(&admin.username, password, &admin.email)
        .await
    {
        tracing::error!(error = ?e, "default admin bootstrap failed");
    }
}
