//! PostgreSQL wire-protocol sessions via tokio-postgres.
//!
//! Every session prepares the rewards statements once at open, so units of
//! work only bind parameters. TLS follows the configured SSL mode.

use crate::error::RewardsError;
use crate::models::{
    Address, CartItem, CartLine, CatalogItem, CatalogQuery, ClusterConfig, Customer, LedgerEntry,
    OrderItem, OrderLine, SslMode, TransactionDetails,
};
use crate::services::connection::{Connector, Session};
use crate::services::credentials::Credential;
use crate::services::store::RewardsStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, NoTls, Row, Socket, Statement};
use uuid::Uuid;

/// How long `close` waits for the connection driver to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_ID_SQL: &str = "select sys.current_session_id()";
const BACKEND_PID_SQL: &str = "select pg_backend_pid()::text";

const CATALOG_COLUMNS: &str = "select id, name, description, category, usd_price::float8, \
     points_price::int4, rating::float4, sku, weight::float4, width::float4, height::float4, \
     depth::float4 \
     from xpoints.catalog_items";

/// Catalog listing with a bound category filter. The order clause is
/// appended from [`CatalogQuery`]'s fixed column and direction names.
fn catalog_listing_sql(query: &CatalogQuery) -> String {
    format!(
        "{CATALOG_COLUMNS} where ($1::text is null or category = $1::text) order by {} {}",
        query.sort.column(),
        query.order.keyword()
    )
}

fn catalog_item_from_row(row: &Row) -> Result<CatalogItem, RewardsError> {
    Ok(CatalogItem {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        description: row.try_get(2)?,
        category: row.try_get(3)?,
        usd_price: row.try_get(4)?,
        points_price: row.try_get(5)?,
        rating: row.try_get(6)?,
        sku: row.try_get(7)?,
        weight: row.try_get(8)?,
        width: row.try_get(9)?,
        height: row.try_get(10)?,
        depth: row.try_get(11)?,
    })
}

/// Opens [`PgSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }

    /// Driver configuration for one connection attempt.
    pub fn pg_config(config: &ClusterConfig, credential: &Credential) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.endpoint)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.username)
            .password(credential.token())
            .application_name(&config.options.application_name)
            .connect_timeout(config.connect_timeout())
            .ssl_mode(match config.ssl_mode {
                SslMode::Disable => tokio_postgres::config::SslMode::Disable,
                _ => tokio_postgres::config::SslMode::Require,
            });
        pg_config
    }

    fn tls_connector(ssl_mode: SslMode) -> Result<MakeTlsConnector, RewardsError> {
        let mut builder = TlsConnector::builder();
        match ssl_mode {
            // Encrypt without verifying the certificate
            SslMode::Disable | SslMode::Require => {
                builder.danger_accept_invalid_certs(true);
            }
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
            SslMode::VerifyFull => {}
        }
        let connector = builder.build().map_err(|e| {
            RewardsError::connection_with_source("Failed to create TLS connector", e)
        })?;
        Ok(MakeTlsConnector::new(connector))
    }

    async fn connect<T>(
        pg_config: &tokio_postgres::Config,
        tls: T,
    ) -> Result<(Client, JoinHandle<()>), RewardsError>
    where
        T: MakeTlsConnect<Socket> + Send + 'static,
        T::Stream: Send + 'static,
        T::TlsConnect: Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) = pg_config.connect(tls).await.map_err(|e| {
            if e.as_db_error().is_some() {
                RewardsError::from(e)
            } else {
                RewardsError::connection_with_source("Failed to connect to cluster", e)
            }
        })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "Connection driver ended with error");
            }
        });

        Ok((client, driver))
    }

    /// Store session id, or the backend pid where the store has none.
    async fn lookup_session_id(client: &Client) -> Result<String, RewardsError> {
        match client.query_one(SESSION_ID_SQL, &[]).await {
            Ok(row) => Ok(row.try_get(0)?),
            Err(e)
                if matches!(
                    e.code(),
                    Some(&SqlState::UNDEFINED_FUNCTION) | Some(&SqlState::INVALID_SCHEMA_NAME)
                ) =>
            {
                let row = client.query_one(BACKEND_PID_SQL, &[]).await?;
                Ok(row.try_get(0)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn open(
        &self,
        config: &ClusterConfig,
        credential: &Credential,
    ) -> Result<PgSession, RewardsError> {
        let pg_config = Self::pg_config(config, credential);

        let (client, driver) = match config.ssl_mode {
            SslMode::Disable => Self::connect(&pg_config, NoTls).await?,
            mode => Self::connect(&pg_config, Self::tls_connector(mode)?).await?,
        };

        let setup = async {
            let session_id = Self::lookup_session_id(&client).await?;
            let statements = Statements::prepare(&client).await?;
            Ok::<_, RewardsError>((session_id, statements))
        };

        match setup.await {
            Ok((session_id, statements)) => {
                tracing::debug!(
                    session_id = %session_id,
                    host = %config.endpoint,
                    "Session opened"
                );
                Ok(PgSession { client, session_id, statements, driver, in_transaction: false })
            }
            Err(e) => {
                drop(client);
                driver.abort();
                Err(e)
            }
        }
    }
}

/// Prepared rewards statements.
struct Statements {
    customer_id: Statement,
    customer: Statement,
    cart_lines: Statement,
    cart_items: Statement,
    cart_quantity: Statement,
    catalog_item_exists: Statement,
    catalog_item: Statement,
    insert_cart_item: Statement,
    update_cart_quantity: Statement,
    delete_cart_item: Statement,
    delete_cart: Statement,
    points_balance: Statement,
    debit_balance: Statement,
    insert_order_item: Statement,
    insert_ledger_entry: Statement,
    ledger_entries: Statement,
    transaction_details: Statement,
}

impl Statements {
    async fn prepare(client: &Client) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            customer_id: client
                .prepare("select id from xpoints.customers where username = $1")
                .await?,
            customer: client
                .prepare(
                    "select id, username, first_name, last_name, maiden_name, email, phone_num, \
                     address, city, state, state_code, postal_code \
                     from xpoints.customers where username = $1",
                )
                .await?,
            cart_lines: client
                .prepare(
                    "select cart.item_id, cart.quantity::int4, cat.points_price::int4 \
                     from xpoints.shopping_cart_items cart \
                     inner join xpoints.catalog_items cat on cart.item_id = cat.id \
                     where cart.customer_id = $1",
                )
                .await?,
            cart_items: client
                .prepare(
                    "select cart.item_id, cat.name, cart.quantity::int4, cat.points_price::int4 \
                     from xpoints.shopping_cart_items cart \
                     inner join xpoints.catalog_items cat on cart.item_id = cat.id \
                     where cart.customer_id = $1 \
                     order by cat.name",
                )
                .await?,
            cart_quantity: client
                .prepare(
                    "select quantity::int4 from xpoints.shopping_cart_items \
                     where customer_id = $1 and item_id = $2",
                )
                .await?,
            catalog_item_exists: client
                .prepare("select 1 from xpoints.catalog_items where id = $1")
                .await?,
            catalog_item: client.prepare(&format!("{CATALOG_COLUMNS} where id = $1")).await?,
            insert_cart_item: client
                .prepare(
                    "insert into xpoints.shopping_cart_items (customer_id, item_id, quantity) \
                     values ($1, $2, $3::int4)",
                )
                .await?,
            update_cart_quantity: client
                .prepare(
                    "update xpoints.shopping_cart_items set quantity = $1::int4 \
                     where customer_id = $2 and item_id = $3",
                )
                .await?,
            delete_cart_item: client
                .prepare(
                    "delete from xpoints.shopping_cart_items \
                     where customer_id = $1 and item_id = $2",
                )
                .await?,
            delete_cart: client
                .prepare("delete from xpoints.shopping_cart_items where customer_id = $1")
                .await?,
            points_balance: client
                .prepare(
                    "select points_balance::int8 from xpoints.points_balances \
                     where customer_id = $1",
                )
                .await?,
            debit_balance: client
                .prepare(
                    "update xpoints.points_balances \
                     set points_balance = points_balance - $1::int8 \
                     where customer_id = $2",
                )
                .await?,
            insert_order_item: client
                .prepare(
                    "insert into xpoints.order_items \
                     (tx_id, cat_item_id, unit_cnt, unit_points_price) \
                     values ($1, $2, $3::int4, $4::int4)",
                )
                .await?,
            insert_ledger_entry: client
                .prepare(
                    "insert into xpoints.transactions \
                     (id, customer_id, tx_type, tx_description, points) \
                     values ($1, $2, $3, $4, $5::int8)",
                )
                .await?,
            ledger_entries: client
                .prepare(
                    "select id, customer_id, tx_type, tx_description, points::int8, \
                     tx_dt::timestamptz from xpoints.transactions \
                     where customer_id = $1 \
                     and tx_dt >= $2::timestamptz and tx_dt <= $3::timestamptz \
                     order by tx_dt desc",
                )
                .await?,
            transaction_details: client
                .prepare(
                    "select t.id, t.customer_id, t.tx_type, t.tx_description, t.points::int8, \
                     t.tx_dt::timestamptz, oi.cat_item_id, oi.unit_cnt::int4, \
                     oi.unit_points_price::int4, oi.item_name, oi.item_description \
                     from xpoints.transactions t \
                     left outer join ( \
                         select o.tx_id, o.cat_item_id, o.unit_cnt, o.unit_points_price, \
                                ci.name item_name, ci.description item_description \
                         from xpoints.order_items o \
                         inner join xpoints.catalog_items ci on ci.id = o.cat_item_id \
                     ) oi on t.id = oi.tx_id \
                     where t.id = $1 and t.customer_id = $2 \
                     order by oi.item_name",
                )
                .await?,
        })
    }
}

/// A session on a PostgreSQL-compatible cluster.
pub struct PgSession {
    client: Client,
    session_id: String,
    statements: Statements,
    driver: JoinHandle<()>,
    in_transaction: bool,
}

impl PgSession {
    /// Whether the underlying connection has closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[async_trait]
impl Session for PgSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn begin(&mut self) -> Result<(), RewardsError> {
        // Set before sending so a BEGIN abandoned in flight still gets rolled back
        self.in_transaction = true;
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RewardsError> {
        self.client.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RewardsError> {
        self.client.batch_execute("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn close(self) -> Result<(), RewardsError> {
        let Self { client, session_id, mut driver, .. } = self;
        drop(client);

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut driver).await {
            Ok(_) => {
                tracing::debug!(session_id = %session_id, "Session closed");
                Ok(())
            }
            Err(_) => {
                driver.abort();
                Err(RewardsError::connection(format!(
                    "Timed out closing session {session_id}"
                )))
            }
        }
    }
}

#[async_trait]
impl RewardsStore for PgSession {
    async fn customer_id(&mut self, username: &str) -> Result<Option<Uuid>, RewardsError> {
        let row = self.client.query_opt(&self.statements.customer_id, &[&username]).await?;
        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn customer(&mut self, username: &str) -> Result<Option<Customer>, RewardsError> {
        let row = self.client.query_opt(&self.statements.customer, &[&username]).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Customer {
            id: row.try_get(0)?,
            username: row.try_get(1)?,
            first_name: row.try_get(2)?,
            last_name: row.try_get(3)?,
            maiden_name: row.try_get(4)?,
            email: row.try_get(5)?,
            phone: row.try_get(6)?,
            address: Address {
                address: row.try_get(7)?,
                city: row.try_get(8)?,
                state: row.try_get(9)?,
                state_code: row.try_get(10)?,
                postal_code: row.try_get(11)?,
            },
        }))
    }

    async fn cart_lines(&mut self, customer_id: Uuid) -> Result<Vec<CartLine>, RewardsError> {
        let rows = self.client.query(&self.statements.cart_lines, &[&customer_id]).await?;
        rows.iter()
            .map(|row| -> Result<CartLine, RewardsError> {
                Ok(CartLine {
                    customer_id,
                    item_id: row.try_get(0)?,
                    quantity: row.try_get(1)?,
                    points_price: row.try_get(2)?,
                })
            })
            .collect()
    }

    async fn cart_items(&mut self, customer_id: Uuid) -> Result<Vec<CartItem>, RewardsError> {
        let rows = self.client.query(&self.statements.cart_items, &[&customer_id]).await?;
        rows.iter()
            .map(|row| -> Result<CartItem, RewardsError> {
                Ok(CartItem {
                    item_id: row.try_get(0)?,
                    name: row.try_get(1)?,
                    quantity: row.try_get(2)?,
                    points_price: row.try_get(3)?,
                })
            })
            .collect()
    }

    async fn cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<i32>, RewardsError> {
        let row = self
            .client
            .query_opt(&self.statements.cart_quantity, &[&customer_id, &item_id])
            .await?;
        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn catalog_item_exists(&mut self, item_id: Uuid) -> Result<bool, RewardsError> {
        let row = self.client.query_opt(&self.statements.catalog_item_exists, &[&item_id]).await?;
        Ok(row.is_some())
    }

    async fn catalog_item(&mut self, item_id: Uuid) -> Result<Option<CatalogItem>, RewardsError> {
        let row = self.client.query_opt(&self.statements.catalog_item, &[&item_id]).await?;
        row.as_ref().map(catalog_item_from_row).transpose()
    }

    async fn catalog_items(
        &mut self,
        query: &CatalogQuery,
    ) -> Result<Vec<CatalogItem>, RewardsError> {
        let sql = catalog_listing_sql(query);
        let rows = self.client.query(&sql, &[&query.category]).await?;
        rows.iter().map(catalog_item_from_row).collect()
    }

    async fn insert_cart_item(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), RewardsError> {
        self.client
            .execute(&self.statements.insert_cart_item, &[&customer_id, &item_id, &quantity])
            .await?;
        Ok(())
    }

    async fn update_cart_quantity(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<u64, RewardsError> {
        Ok(self
            .client
            .execute(&self.statements.update_cart_quantity, &[&quantity, &customer_id, &item_id])
            .await?)
    }

    async fn delete_cart_item(
        &mut self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<u64, RewardsError> {
        Ok(self
            .client
            .execute(&self.statements.delete_cart_item, &[&customer_id, &item_id])
            .await?)
    }

    async fn delete_cart(&mut self, customer_id: Uuid) -> Result<u64, RewardsError> {
        Ok(self.client.execute(&self.statements.delete_cart, &[&customer_id]).await?)
    }

    async fn points_balance(&mut self, customer_id: Uuid) -> Result<Option<i64>, RewardsError> {
        let row = self.client.query_opt(&self.statements.points_balance, &[&customer_id]).await?;
        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn debit_balance(&mut self, customer_id: Uuid, points: i64) -> Result<u64, RewardsError> {
        Ok(self
            .client
            .execute(&self.statements.debit_balance, &[&points, &customer_id])
            .await?)
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), RewardsError> {
        self.client
            .execute(
                &self.statements.insert_order_item,
                &[&item.tx_id, &item.item_id, &item.quantity, &item.points_price],
            )
            .await?;
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), RewardsError> {
        self.client
            .execute(
                &self.statements.insert_ledger_entry,
                &[
                    &entry.id,
                    &entry.customer_id,
                    &entry.tx_type,
                    &entry.description,
                    &entry.points,
                ],
            )
            .await?;
        Ok(())
    }

    async fn ledger_entries(
        &mut self,
        customer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, RewardsError> {
        let rows = self
            .client
            .query(&self.statements.ledger_entries, &[&customer_id, &from, &to])
            .await?;
        rows.iter()
            .map(|row| -> Result<LedgerEntry, RewardsError> {
                Ok(LedgerEntry {
                    id: row.try_get(0)?,
                    customer_id: row.try_get(1)?,
                    tx_type: row.try_get(2)?,
                    description: row.try_get(3)?,
                    points: row.try_get(4)?,
                    timestamp: row.try_get(5)?,
                })
            })
            .collect()
    }

    async fn transaction_details(
        &mut self,
        customer_id: Uuid,
        tx_id: Uuid,
    ) -> Result<Option<TransactionDetails>, RewardsError> {
        let rows = self
            .client
            .query(&self.statements.transaction_details, &[&tx_id, &customer_id])
            .await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let entry = LedgerEntry {
            id: first.try_get(0)?,
            customer_id: first.try_get(1)?,
            tx_type: first.try_get(2)?,
            description: first.try_get(3)?,
            points: first.try_get(4)?,
            timestamp: first.try_get(5)?,
        };

        let mut order_items = Vec::new();
        for row in &rows {
            let Some(item_id) = row.try_get::<_, Option<Uuid>>(6)? else {
                continue;
            };
            order_items.push(OrderLine {
                item_id,
                quantity: row.try_get(7)?,
                points_price: row.try_get(8)?,
                name: row.try_get(9)?,
                description: row.try_get(10)?,
            });
        }

        Ok(Some(TransactionDetails { entry, order_items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::config::Host;

    fn config() -> ClusterConfig {
        ClusterConfig::new("abc.dsql.us-east-1.on.aws", "us-east-1", "postgres", "admin")
    }

    #[test]
    fn test_pg_config_uses_token_as_password() {
        let credential = Credential::new("signed-token", Duration::from_secs(30));
        let pg_config = PgConnector::pg_config(&config(), &credential);

        assert_eq!(pg_config.get_hosts(), &[Host::Tcp("abc.dsql.us-east-1.on.aws".to_string())]);
        assert_eq!(pg_config.get_ports(), &[5432]);
        assert_eq!(pg_config.get_user(), Some("admin"));
        assert_eq!(pg_config.get_dbname(), Some("postgres"));
        assert_eq!(pg_config.get_password(), Some(b"signed-token".as_slice()));
        assert_eq!(pg_config.get_application_name(), Some("rewards"));
        assert_eq!(pg_config.get_connect_timeout(), Some(&Duration::from_secs(10)));
    }

    #[test]
    fn test_catalog_listing_binds_category_and_orders_by_allowed_column() {
        let category = Some("Books'; drop table x; --");
        let query = CatalogQuery::new(category, Some("rating"), Some("desc"));
        let sql = catalog_listing_sql(&query);

        assert!(sql.ends_with("order by rating desc"));
        assert!(sql.contains("category = $1::text"));
        assert!(!sql.contains("Books"));

        let fallback = catalog_listing_sql(&CatalogQuery::new(None, Some("sku"), Some("up")));
        assert!(fallback.ends_with("order by name asc"));
    }

    #[test]
    fn test_ssl_mode_mapping() {
        let credential = Credential::new("t", Duration::from_secs(30));
        let mut config = config();
        assert_eq!(
            PgConnector::pg_config(&config, &credential).get_ssl_mode(),
            tokio_postgres::config::SslMode::Require
        );

        config.ssl_mode = SslMode::Disable;
        assert_eq!(
            PgConnector::pg_config(&config, &credential).get_ssl_mode(),
            tokio_postgres::config::SslMode::Disable
        );
    }
}
