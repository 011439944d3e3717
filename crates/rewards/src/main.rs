//! rewards - command-line driver for the DSQL rewards backend.

mod cli;

use clap::Parser;
use cli::{CartCommands, CatalogCommands, Cli, Commands};
use rewards_core::error::{ClassifiedError, RewardsError};
use rewards_core::logging::{init_logging, log_dir, LogConfig};
use rewards_core::models::{CatalogItem, CatalogQuery, ADMIN_USER};
use rewards_core::services::{
    Connector, MemoryDatabase, PgConnector, RewardsStore, SdkTokenIssuer, StaticTokenIssuer,
    TokenIssuer,
};
use rewards_core::{ClusterConfig, Response, RetryPolicy, RewardsService};
use std::process::ExitCode;
use std::sync::Arc;

/// Customer seeded in `--in-memory` mode when no user is given.
const DEMO_USER: &str = "demo";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(log_dir());
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    let _logging_guard = init_logging(log_config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let response = runtime.block_on(run(cli));

    let body = response.body_string();
    if !body.is_empty() {
        println!("{body}");
    }
    if response.status < 400 {
        ExitCode::SUCCESS
    } else {
        tracing::debug!(status = response.status, "Command failed");
        ExitCode::FAILURE
    }
}

async fn run(cli: Cli) -> Response {
    let defaults = RetryPolicy::default();
    let policy = RetryPolicy::new(cli.max_attempts, defaults.base_delay, defaults.max_delay);

    if cli.in_memory {
        let user = if cli.user.is_empty() { DEMO_USER } else { cli.user.as_str() };
        let db = demo_database(user);
        let config = ClusterConfig::new("localhost", "local", "postgres", ADMIN_USER);
        let issuer = Arc::new(StaticTokenIssuer::new("demo"));
        let service = RewardsService::new(config, db.connector(), issuer, policy);
        return execute(&service, user, cli.command).await;
    }

    let config = match ClusterConfig::from_env() {
        Ok(config) => config,
        Err(message) => {
            return Response::from_error(&ClassifiedError::rejected(RewardsError::config(message)))
        }
    };

    let issuer: Arc<dyn TokenIssuer> = match cli.password {
        Some(password) => Arc::new(StaticTokenIssuer::new(password)),
        None => Arc::new(SdkTokenIssuer::load().await),
    };

    let service = RewardsService::new(config, PgConnector::new(), issuer, policy);
    if let Err(e) = service.warm_up().await {
        return Response::from_error(&e);
    }

    let response = execute(&service, &cli.user, cli.command).await;
    service.shutdown().await;
    response
}

async fn execute<C>(service: &RewardsService<C>, user: &str, command: Commands) -> Response
where
    C: Connector,
    C::Session: RewardsStore,
{
    match command {
        Commands::Checkout => Response::checkout(service.checkout(user).await),
        Commands::Balance => Response::balance(service.balance(user).await),
        Commands::Profile => Response::customer(service.customer(user).await),
        Commands::Cart { operation } => match operation {
            CartCommands::List => Response::cart(service.cart(user).await),
            CartCommands::Add { item_id, quantity } => {
                Response::cart_change(service.upsert_cart_item(user, item_id, quantity).await)
            }
            CartCommands::Remove { item_id } => {
                Response::cart_removal(service.remove_cart_items(user, item_id).await)
            }
        },
        Commands::Transactions { from, to } => {
            Response::transactions(service.transactions(user, from, to).await)
        }
        Commands::Transaction { tx_id } => {
            Response::transaction_details(service.transaction_details(user, tx_id).await)
        }
        Commands::Catalog { operation } => match operation {
            CatalogCommands::List { category, sort_by, sort_order } => {
                let query = CatalogQuery::new(
                    category.as_deref(),
                    sort_by.as_deref(),
                    sort_order.as_deref(),
                );
                Response::catalog(service.catalog(query).await)
            }
            CatalogCommands::Show { item_id } => {
                Response::catalog_item(service.catalog_item(item_id).await)
            }
        },
    }
}

/// In-memory store with one customer, a small catalog and a filled cart.
fn demo_database(user: &str) -> MemoryDatabase {
    let db = MemoryDatabase::new();
    let customer = db.seed_customer(user, 1_000);

    for (name, category, price, quantity) in [
        ("Coffee Mug", "Home", 150, 2),
        ("Water Bottle", "Sports", 300, 0),
        ("Sticker Pack", "Toys", 25, 4),
    ] {
        let item_id = db.seed_catalog(CatalogItem {
            name: name.to_string(),
            category: Some(category.to_string()),
            points_price: price,
            ..Default::default()
        });
        if quantity > 0 {
            db.seed_cart_line(customer, item_id, quantity);
        }
        tracing::info!(item_id = %item_id, name, points_price = price, "Seeded catalog item");
    }

    db
}
