use async_trait::async_trait;
use sqlx::{PgConnection, Row, postgres::PgRow};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, is_idempotency_conflict},
    app_error::{AppError, AppResult},
    application::use_cases::ledger::{
        AccountRecord, AccountWrite, CreditTransactionRecord, Decide, Decision, LedgerRepo,
        LedgerState, NewCreditTransaction, NewSubscriptionEvent, SubscriptionEventRecord,
        SubscriptionRecord, SubscriptionWrite, TransitionOutcome, event_metadata,
    },
    domain::entities::credit_transaction::CreditTransactionType,
};

const ACCOUNT_COLS: &str = r#"
    id, total_credits, used_credits, active_plan, created_at, updated_at
"#;

const SUBSCRIPTION_COLS: &str = r#"
    id, account_id, plan, status, current_period_start, current_period_end,
    cancel_at_period_end, trial_end, external_customer_id, external_subscription_id,
    external_price_id, last_external_status, last_external_event_type, canceled_at,
    created_at, updated_at
"#;

const CREDIT_TRANSACTION_COLS: &str = r#"
    id, account_id, amount, resulting_credits, transaction_type, description, created_at
"#;

const EVENT_COLS: &str = r#"
    id, account_id, subscription_id, previous_status, new_status, reason, source,
    metadata, created_at
"#;

fn row_to_account(row: PgRow) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        total_credits: row.get("total_credits"),
        used_credits: row.get("used_credits"),
        active_plan: row.get("active_plan"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_subscription(row: PgRow) -> SubscriptionRecord {
    SubscriptionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        plan: row.get("plan"),
        status: row.get("status"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        trial_end: row.get("trial_end"),
        external_customer_id: row.get("external_customer_id"),
        external_subscription_id: row.get("external_subscription_id"),
        external_price_id: row.get("external_price_id"),
        last_external_status: row.get("last_external_status"),
        last_external_event_type: row.get("last_external_event_type"),
        canceled_at: row.get("canceled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_credit_transaction(row: PgRow) -> CreditTransactionRecord {
    CreditTransactionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        amount: row.get("amount"),
        resulting_credits: row.get("resulting_credits"),
        transaction_type: row.get("transaction_type"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

fn row_to_event(row: PgRow) -> SubscriptionEventRecord {
    SubscriptionEventRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        subscription_id: row.get("subscription_id"),
        previous_status: row.get("previous_status"),
        new_status: row.get("new_status"),
        reason: row.get("reason"),
        source: row.get("source"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

async fn fetch_state(conn: &mut PgConnection, account_id: Uuid) -> AppResult<LedgerState> {
    let account = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE id = $1",
        ACCOUNT_COLS
    ))
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(row_to_account);

    let subscription = sqlx::query(&format!(
        "SELECT {} FROM subscriptions WHERE account_id = $1",
        SUBSCRIPTION_COLS
    ))
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(row_to_subscription);

    let latest_renewal_at = sqlx::query_scalar(
        "SELECT MAX(created_at) FROM credit_transactions WHERE account_id = $1 AND transaction_type = $2",
    )
    .bind(account_id)
    .bind(CreditTransactionType::Renewal)
    .fetch_one(&mut *conn)
    .await?;

    Ok(LedgerState {
        account_id,
        account,
        subscription,
        latest_renewal_at,
    })
}

async fn upsert_subscription(
    conn: &mut PgConnection,
    account_id: Uuid,
    write: &SubscriptionWrite,
) -> AppResult<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO subscriptions
            (id, account_id, plan, status, current_period_start, current_period_end,
             cancel_at_period_end, trial_end, external_customer_id, external_subscription_id,
             external_price_id, last_external_status, last_external_event_type, canceled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (account_id) DO UPDATE SET
            plan = EXCLUDED.plan,
            status = EXCLUDED.status,
            current_period_start = EXCLUDED.current_period_start,
            current_period_end = EXCLUDED.current_period_end,
            cancel_at_period_end = EXCLUDED.cancel_at_period_end,
            trial_end = EXCLUDED.trial_end,
            external_customer_id = EXCLUDED.external_customer_id,
            external_subscription_id = EXCLUDED.external_subscription_id,
            external_price_id = EXCLUDED.external_price_id,
            last_external_status = EXCLUDED.last_external_status,
            last_external_event_type = EXCLUDED.last_external_event_type,
            canceled_at = EXCLUDED.canceled_at,
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(write.plan)
    .bind(write.status)
    .bind(write.current_period_start)
    .bind(write.current_period_end)
    .bind(write.cancel_at_period_end)
    .bind(write.trial_end)
    .bind(&write.external_customer_id)
    .bind(&write.external_subscription_id)
    .bind(&write.external_price_id)
    .bind(&write.last_external_status)
    .bind(&write.last_external_event_type)
    .bind(write.canceled_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

async fn update_account(
    conn: &mut PgConnection,
    account_id: Uuid,
    write: &AccountWrite,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET total_credits = $2, used_credits = $3, active_plan = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(write.total_credits)
    .bind(write.used_credits)
    .bind(write.active_plan)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_credit_transaction(
    conn: &mut PgConnection,
    account_id: Uuid,
    credit: &NewCreditTransaction,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (id, account_id, amount, resulting_credits, transaction_type, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(credit.amount)
    .bind(credit.resulting_credits)
    .bind(credit.transaction_type)
    .bind(&credit.description)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_event(
    conn: &mut PgConnection,
    account_id: Uuid,
    subscription_id: Uuid,
    event: &NewSubscriptionEvent,
    idempotency_key: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO subscription_events
            (id, account_id, subscription_id, previous_status, new_status, reason, source, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(subscription_id)
    .bind(event.previous_status)
    .bind(event.new_status)
    .bind(&event.reason)
    .bind(event.source)
    .bind(event_metadata(&event.metadata, idempotency_key))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn key_recorded(conn: &mut PgConnection, idempotency_key: &str) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM subscription_events WHERE metadata ->> 'idempotency_key' = $1)",
    )
    .bind(idempotency_key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

#[async_trait]
impl LedgerRepo for PostgresPersistence {
    async fn load_state(&self, account_id: Uuid) -> AppResult<LedgerState> {
        let mut conn = self.pool.acquire().await?;
        fetch_state(&mut conn, account_id).await
    }

    #[instrument(skip(self, decide))]
    async fn transact(
        &self,
        account_id: Uuid,
        idempotency_key: Option<&str>,
        decide: Decide<'_>,
    ) -> AppResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Every transition on one account serializes on its row lock.
        sqlx::query("INSERT INTO accounts (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        if let Some(key) = idempotency_key
            && key_recorded(&mut tx, key).await?
        {
            debug!(idempotency_key = key, "Transition already recorded");
            tx.rollback().await?;
            return Ok(TransitionOutcome::Duplicate);
        }

        let state = fetch_state(&mut tx, account_id).await?;

        let transition = match decide(&state)? {
            Decision::Skip(reason) => {
                tx.rollback().await?;
                return Ok(TransitionOutcome::Skipped(reason));
            }
            Decision::Apply(transition) => transition,
        };
        transition.check(&state)?;

        let mut subscription_id = state.subscription.as_ref().map(|s| s.id);
        if let Some(write) = &transition.subscription {
            subscription_id = Some(upsert_subscription(&mut tx, account_id, write).await?);
        }

        if let Some(write) = &transition.account {
            update_account(&mut tx, account_id, write).await?;
        }

        if let Some(credit) = &transition.credit {
            insert_credit_transaction(&mut tx, account_id, credit).await?;
        }

        if let Some(event) = &transition.event {
            let subscription_id = subscription_id
                .ok_or_else(|| AppError::Internal("event without subscription".into()))?;
            // A concurrent delivery on another account committed the same key first.
            if let Err(e) =
                insert_event(&mut tx, account_id, subscription_id, event, idempotency_key).await
            {
                if is_idempotency_conflict(&e) {
                    tx.rollback().await?;
                    return Ok(TransitionOutcome::Duplicate);
                }
                return Err(e.into());
            }
        }

        let state = fetch_state(&mut tx, account_id).await?;
        tx.commit().await?;

        Ok(TransitionOutcome::Applied(state))
    }

    async fn is_applied(&self, idempotency_key: &str) -> AppResult<bool> {
        let mut conn = self.pool.acquire().await?;
        key_recorded(&mut conn, idempotency_key).await
    }

    async fn find_account_by_external_subscription(
        &self,
        external_subscription_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let account_id = sqlx::query_scalar(
            "SELECT account_id FROM subscriptions WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account_id)
    }

    async fn find_account_by_external_customer(
        &self,
        external_customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let account_id = sqlx::query_scalar(
            "SELECT account_id FROM subscriptions WHERE external_customer_id = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(external_customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account_id)
    }

    async fn list_events(&self, account_id: Uuid) -> AppResult<Vec<SubscriptionEventRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_events WHERE account_id = $1 ORDER BY created_at, id",
            EVENT_COLS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    async fn list_credit_transactions(
        &self,
        account_id: Uuid,
    ) -> AppResult<Vec<CreditTransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM credit_transactions WHERE account_id = $1 ORDER BY created_at, id",
            CREDIT_TRANSACTION_COLS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_credit_transaction).collect())
    }
}
