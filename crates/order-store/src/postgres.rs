use async_trait::async_trait;
use chrono::Utc;
use common::{CartLine, CatalogId, Money, OrderId, UserId};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Cart, NewOrder, Order, OrderItem, OrderStatus, OrderStore, PaymentStatus, Result, StoreError,
};

/// Name of the unique constraint that makes order creation idempotent.
const UNIQUE_ORDER_NUMBER: &str = "unique_order_number";

const ORDER_COLUMNS: &str = r#"
    SELECT id, user_id, order_number, status, payment_status, total_amount, currency,
           payment_session_id, payment_intent_id, customer_email, created_at
    FROM orders
"#;

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Loads an order and holds its row lock until `tx` ends.
    async fn lock_order(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_number: &str,
    ) -> Result<Order> {
        let row = sqlx::query(&format!("{ORDER_COLUMNS} WHERE order_number = $1 FOR UPDATE"))
            .bind(order_number)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::OrderNotFound(order_number.to_string()))?;

        Self::row_to_order(row)
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            order_number: row.try_get("order_number")?,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| StoreError::InvalidRecord(format!("order status {status}")))?,
            payment_status: PaymentStatus::parse(&payment_status).ok_or_else(|| {
                StoreError::InvalidRecord(format!("payment status {payment_status}"))
            })?,
            total_amount: Money::from_minor(row.try_get("total_amount")?),
            currency: row.try_get("currency")?,
            payment_session_id: row.try_get("payment_session_id")?,
            payment_intent_id: row.try_get("payment_intent_id")?,
            customer_email: row.try_get("customer_email")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;

        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            catalog_id: CatalogId::new(row.try_get::<String, _>("catalog_id")?),
            name: row.try_get("name")?,
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidRecord(format!("item quantity {quantity}")))?,
            unit_price: Money::from_minor(row.try_get("unit_price")?),
            total_price: Money::from_minor(row.try_get("total_price")?),
        })
    }

    fn row_to_cart(row: PgRow) -> Result<Cart> {
        let Json(items): Json<Vec<CartLine>> = row.try_get("items")?;

        Ok(Cart {
            id: row.try_get("id")?,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            items,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, new_order), fields(order_number = %new_order.order_number))]
    async fn create_order_with_items_and_clear_cart(&self, new_order: NewOrder) -> Result<OrderId> {
        let (order, items) = new_order.materialize()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, status, payment_status, total_amount,
                                currency, payment_session_id, payment_intent_id, customer_email, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_amount.minor())
        .bind(&order.currency)
        .bind(&order.payment_session_id)
        .bind(&order.payment_intent_id)
        .bind(&order.customer_email)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_ORDER_NUMBER)
            {
                return StoreError::DuplicateOrder {
                    order_number: order.order_number.clone(),
                };
            }
            StoreError::Database(e)
        })?;

        for (position, item) in items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::InvalidOrder(format!("quantity {}", item.quantity)))?;
            let position = i32::try_from(position)
                .map_err(|_| StoreError::InvalidOrder("too many items".to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, catalog_id, name, quantity, unit_price, total_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id.as_uuid())
            .bind(position)
            .bind(item.catalog_id.as_str())
            .bind(&item.name)
            .bind(quantity)
            .bind(item.unit_price.minor())
            .bind(item.total_price.minor())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE carts SET items = '[]'::jsonb, updated_at = $2 WHERE user_id = $1")
            .bind(order.user_id.as_uuid())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(order.id)
    }

    async fn get_cart_items(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self
            .get_cart(user_id)
            .await?
            .map(|cart| cart.items)
            .unwrap_or_default())
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT id, user_id, items, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_cart).transpose()
    }

    async fn replace_cart(&self, user_id: UserId, items: Vec<CartLine>) -> Result<Cart> {
        let row = sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, items, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                items = EXCLUDED.items,
                updated_at = EXCLUDED.updated_at
            RETURNING id, user_id, items, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id.as_uuid())
        .bind(Json(&items))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_cart(row)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE carts SET items = '[]'::jsonb, updated_at = $2 WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{ORDER_COLUMNS} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let offset = i64::try_from(skip).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            "{ORDER_COLUMNS} WHERE user_id = $1 ORDER BY created_at DESC, order_number ASC OFFSET $2 LIMIT $3"
        ))
        .bind(user_id.as_uuid())
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn update_order_status(&self, order_number: &str, status: OrderStatus) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_order(&mut tx, order_number).await?;

        if order.status == status {
            return Ok(order);
        }
        if !order.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: order.status.to_string(),
                to: status.to_string(),
            });
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE order_number = $1")
            .bind(order_number)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        order.status = status;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    async fn update_payment_status(
        &self,
        order_number: &str,
        status: PaymentStatus,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = Self::lock_order(&mut tx, order_number).await?;

        if order.payment_status == status {
            return Ok(order);
        }
        if !order.payment_status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: order.payment_status.to_string(),
                to: status.to_string(),
            });
        }

        sqlx::query(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE order_number = $1",
        )
        .bind(order_number)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        order.payment_status = status;
        Ok(order)
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, catalog_id, name, quantity, unit_price, total_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn order_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;

        usize::try_from(count).map_err(|_| StoreError::InvalidRecord(format!("count {count}")))
    }
}
