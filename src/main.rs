use dotenvy::dotenv;
use gruzhub_workflow::{
    app::{App, messenger_from_config},
    config::{self, database},
    core::users,
    errors::Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also be set externally
    dotenv().ok();

    // 3. Load the main application configuration
    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Critical error loading application configuration: {}", e))?;
    info!("Successfully processed application configuration.");

    // 4. Connect and create tables
    let db = database::create_connection(&app_config.database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Bootstrap admin, the sweeper acts on its behalf
    users::ensure_admin(&db, &app_config.admin).await?;

    // 6. Wire services and start the notification worker
    let messenger = messenger_from_config(&app_config.notifications);
    let (app, worker) = App::build(&app_config, db, messenger);
    let worker = worker.spawn();

    tokio::select! {
        () = app.sweeper.run() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    // Dropping the app closes the queue; the worker drains what is left.
    drop(app);
    if let Err(e) = worker.await {
        error!("Notification worker panicked: {}", e);
    }
    Ok(())
}
