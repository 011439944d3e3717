//! Command-line arguments.

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Rewards backend driver for Aurora DSQL.
///
/// Cluster settings come from CLUSTER_ENDPOINT, AWS_REGION, DB_USERNAME and
/// DB_NAME. Each command prints the JSON response body on stdout.
#[derive(Parser, Debug)]
#[command(name = "rewards")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Customer username the command acts for
    #[arg(short, long, global = true, env = "REWARDS_USER", default_value = "")]
    pub user: String,

    /// Static password instead of a generated IAM token
    #[arg(long, global = true, env = "DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Run against a seeded in-memory store
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// Attempts per transaction before giving up
    #[arg(long, global = true, default_value_t = 5)]
    pub max_attempts: u32,

    /// Log filter (overrides REWARDS_LOG)
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Turn the cart into an order paid with points
    Checkout,

    /// Show the points balance
    Balance,

    /// Show the customer profile
    Profile,

    /// Shopping cart operations
    Cart {
        #[command(subcommand)]
        operation: CartCommands,
    },

    /// List ledger entries, newest first
    Transactions {
        /// Window start in epoch milliseconds (default: 30 days before --to)
        #[arg(long)]
        from: Option<i64>,

        /// Window end in epoch milliseconds (default: now)
        #[arg(long)]
        to: Option<i64>,
    },

    /// Show one ledger entry with its order items
    Transaction {
        /// Ledger entry ID
        tx_id: Uuid,
    },

    /// Browse the catalog
    Catalog {
        #[command(subcommand)]
        operation: CatalogCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// List catalog items
    List {
        /// Only items in this category
        #[arg(long)]
        category: Option<String>,

        /// Sort column: name, usd_price, points_price or rating
        #[arg(long)]
        sort_by: Option<String>,

        /// Sort direction: asc or desc
        #[arg(long)]
        sort_order: Option<String>,
    },

    /// Show one catalog item
    Show {
        /// Catalog item ID
        item_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum CartCommands {
    /// Show cart contents
    List,

    /// Change the quantity of an item; negative quantities remove units
    Add {
        /// Catalog item ID
        item_id: Uuid,

        /// Units to add
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        quantity: i32,
    },

    /// Remove an item, or everything when no item is given
    Remove {
        /// Catalog item ID
        item_id: Option<Uuid>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cart_add() {
        let item = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "rewards",
            "--user",
            "alice",
            "cart",
            "add",
            &item.to_string(),
            "--quantity",
            "-2",
        ])
        .unwrap();

        assert_eq!(cli.user, "alice");
        match cli.command {
            Commands::Cart { operation: CartCommands::Add { item_id, quantity } } => {
                assert_eq!(item_id, item);
                assert_eq!(quantity, -2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_catalog_list() {
        let cli = Cli::try_parse_from([
            "rewards",
            "catalog",
            "list",
            "--category",
            "Books",
            "--sort-by",
            "points_price",
            "--sort-order",
            "desc",
        ])
        .unwrap();

        match cli.command {
            Commands::Catalog {
                operation: CatalogCommands::List { category, sort_by, sort_order },
            } => {
                assert_eq!(category.as_deref(), Some("Books"));
                assert_eq!(sort_by.as_deref(), Some("points_price"));
                assert_eq!(sort_order.as_deref(), Some("desc"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_transaction_details() {
        let tx = Uuid::new_v4();
        let cli = Cli::try_parse_from(["rewards", "transaction", &tx.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::Transaction { tx_id } if tx_id == tx));
    }

    #[test]
    fn test_malformed_item_id_is_rejected() {
        assert!(Cli::try_parse_from(["rewards", "cart", "remove", "not-a-uuid"]).is_err());
    }
}
