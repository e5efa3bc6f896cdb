//! `gascyl` admin CLI.
//!
//! Applies the schema and prints inventory reports as JSON. Backends are
//! picked from the environment (`DATABASE_URL`, `REDIS_URL`, ...); without a
//! database URL the commands run against an empty in-memory store.

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use gascyl_infra::store::{
    CategoryFilter, CategorySort, CategorySortField, InventoryStore, PageRequest, SortOrder,
};
use gascyl_infra::{InventoryConfig, InventoryServices, LogFormat};
use gascyl_observability::LogOutput;

#[derive(Parser)]
#[command(name = "gascyl")]
#[command(about = "Gas cylinder inventory administration")]
#[command(version)]
struct Cli {
    /// PostgreSQL URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the inventory schema
    Migrate,

    /// Category stock summary
    Summary,

    /// Cylinder fleet summary
    Cylinders,

    /// Active categories below the restock threshold
    RestockReport {
        /// Maximum number of categories to list
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Subscriber first, so config warnings about bad env values are emitted.
    gascyl_observability::init_with(log_output(LogFormat::from_env()));
    let mut config = InventoryConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }

    if config.database_url.is_some() {
        let services = InventoryServices::postgres(&config).await?;
        run(&services, cli.command).await
    } else {
        if matches!(cli.command, Command::Migrate) {
            bail!("migrate needs a database: pass --database-url or set DATABASE_URL");
        }
        let services = InventoryServices::in_memory(&config)?;
        run(&services, cli.command).await
    }
}

fn log_output(format: LogFormat) -> LogOutput {
    match format {
        LogFormat::Json => LogOutput::Json,
        LogFormat::Pretty => LogOutput::Pretty,
    }
}

async fn run<S: InventoryStore>(services: &InventoryServices<S>, command: Command) -> anyhow::Result<()> {
    match command {
        // Connecting already applied the schema.
        Command::Migrate => info!("inventory schema is up to date"),
        Command::Summary => print_json(&services.queries.category_summary().await?)?,
        Command::Cylinders => print_json(&services.queries.cylinder_summary().await?)?,
        Command::RestockReport { limit } => {
            let filter = CategoryFilter {
                requires_restock: Some(true),
                ..Default::default()
            };
            let sort = CategorySort::new(CategorySortField::FilledQuantity, SortOrder::Asc);
            let page = services
                .queries
                .list_categories(&filter, sort, PageRequest::new(1, limit))
                .await?;
            print_json(&page)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn restock_report_limit_defaults_to_fifty() {
        let cli = Cli::parse_from(["gascyl", "restock-report"]);
        assert!(matches!(cli.command, Command::RestockReport { limit: 50 }));
    }

    #[test]
    fn log_format_maps_to_subscriber_output() {
        assert_eq!(log_output(LogFormat::Pretty), LogOutput::Pretty);
        assert_eq!(log_output(LogFormat::Json), LogOutput::Json);
    }
}
