use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use storefront_api::{
    auth::{AuthConfig, AuthService, ADMIN_ROLE},
    config::{self, AppConfig},
    db,
    openapi::ApiDocV1,
    services::{
        orders::{OrderFilter, OrderService},
        coupons::CouponService,
        Actor, Page,
    },
    entities::OrderStatus,
};
use tracing::debug;
use utoipa::OpenApi;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "storefront-cli", about = "Operator tooling for the storefront API")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Mint a bearer token signed with the configured secret
    IssueToken(IssueTokenArgs),
    /// Print the OpenAPI document
    Openapi,
    /// List recent orders
    Orders(OrdersArgs),
}

#[derive(Args)]
struct IssueTokenArgs {
    #[arg(long)]
    user_id: Option<Uuid>,
    /// Repeatable; `admin` grants the admin endpoints
    #[arg(long = "role")]
    roles: Vec<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Args)]
struct OrdersArgs {
    #[arg(long)]
    status: Option<OrderStatus>,
    #[arg(long)]
    user_id: Option<Uuid>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

#[derive(Serialize)]
struct IssuedToken {
    user_id: Uuid,
    roles: Vec<String>,
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Openapi => {
            println!("{}", ApiDocV1::openapi().to_pretty_json()?);
        }
        Commands::Migrate => {
            let cfg = load_config()?;
            let pool = db::establish_connection_from_app_config(&cfg)
                .await
                .context("failed to connect to the database")?;
            db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::IssueToken(args) => issue_token(&load_config()?, args, cli.json)?,
        Commands::Orders(args) => list_orders(&load_config()?, args, cli.json).await?,
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    debug!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

fn issue_token(cfg: &AppConfig, args: IssueTokenArgs, json: bool) -> Result<()> {
    let auth = AuthService::new(AuthConfig::from(cfg));
    let user_id = args.user_id.unwrap_or_else(Uuid::new_v4);
    let token = auth
        .issue_token(user_id, args.name, args.email, args.roles.clone())
        .context("failed to sign token")?;

    if json {
        print_json(&IssuedToken {
            user_id,
            roles: args.roles,
            token,
        })?;
    } else {
        println!("user_id: {}", user_id);
        if args.roles.iter().any(|r| r == ADMIN_ROLE) {
            println!("roles:   {} (admin endpoints enabled)", args.roles.join(","));
        } else if !args.roles.is_empty() {
            println!("roles:   {}", args.roles.join(","));
        }
        println!("{}", token);
    }
    Ok(())
}

async fn list_orders(cfg: &AppConfig, args: OrdersArgs, json: bool) -> Result<()> {
    let pool = Arc::new(
        db::establish_connection_from_app_config(cfg)
            .await
            .context("failed to connect to the database")?,
    );
    let coupons = CouponService::new(pool.clone(), cfg.coupons.free_shipping_policy);
    let orders = OrderService::new(pool, coupons, cfg, None);

    let filter = OrderFilter {
        user_id: args.user_id,
        status: args.status,
    };
    let page = orders
        .list_orders(
            Actor::admin(Uuid::nil()),
            filter,
            Page::new(Some(args.page), Some(args.limit)),
        )
        .await?;

    if json {
        return print_json(&page);
    }
    println!("{} order(s), page {} of size {}", page.total, page.page, page.limit);
    for entry in &page.items {
        let order = &entry.order;
        println!(
            "- {} • {} • {} / {} • total {} {}",
            order.order_number,
            order.id,
            order.status,
            order.payment_status,
            order.total_price,
            cfg.currency
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
