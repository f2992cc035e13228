// 🗄️ Source Loader - Three flat single-table reads, no joins
//
// CustomerEventData → PricedEvent   (filtered: event type + minimum date)
// ContentPrice      → PriceRecord   (unfiltered, historical duplicates kept)
// CustomerData      → ContactRecord (filtered: channel type)
//
// Any SQL or parse failure aborts the load; nothing partial is returned.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::records::{ContactRecord, PriceRecord, PricedEvent};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Everything the core needs, fully materialized
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    pub events: Vec<PricedEvent>,
    pub prices: Vec<PriceRecord>,
    pub contacts: Vec<ContactRecord>,
}

/// Create the source tables if absent (tests, local demos)
pub fn setup_source_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS CustomerEventData (
            EventDataID INTEGER PRIMARY KEY AUTOINCREMENT,
            EventID INTEGER NOT NULL DEFAULT 0,
            ContentID INTEGER NOT NULL,
            CustomerID INTEGER NOT NULL,
            EventTypeID INTEGER NOT NULL,
            EventDate TEXT NOT NULL,
            Quantity INTEGER NOT NULL,
            InsertDate TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS ContentPrice (
            ContentPriceID INTEGER PRIMARY KEY AUTOINCREMENT,
            ContentID INTEGER NOT NULL,
            Price DECIMAL(10,2) NOT NULL,
            Currency TEXT NOT NULL DEFAULT 'EUR',
            InsertDate TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS CustomerData (
            CustomerChannelID INTEGER PRIMARY KEY AUTOINCREMENT,
            CustomerID INTEGER NOT NULL,
            ChannelTypeID INTEGER NOT NULL,
            ChannelValue TEXT NOT NULL,
            InsertDate TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_event_type_date ON CustomerEventData(EventTypeID, EventDate);",
    )
    .context("Failed to create source schema")?;

    Ok(())
}

// ============================================================================
// LOADERS
// ============================================================================

/// Load events of one kind on or after `since`
pub fn load_events(conn: &Connection, since: NaiveDate, event_type_id: i64) -> Result<Vec<PricedEvent>> {
    tracing::info!(stage = "LOAD", table = "CustomerEventData", "loading events");

    let mut stmt = conn.prepare(
        "SELECT EventDataID, ContentID, CustomerID, Quantity, CAST(EventDate AS TEXT)
         FROM CustomerEventData
         WHERE EventTypeID = ?1 AND EventDate >= ?2
         ORDER BY EventDataID",
    )?;

    let rows = stmt
        .query_map(params![event_type_id, since.format("%Y-%m-%d").to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read CustomerEventData rows")?;

    let mut events = Vec::with_capacity(rows.len());
    for (event_data_id, content_id, customer_id, quantity, event_date) in rows {
        let quantity = u32::try_from(quantity)
            .map_err(|_| anyhow!("EventDataID {}: invalid quantity {}", event_data_id, quantity))?;
        let event_timestamp = parse_timestamp(&event_date)
            .with_context(|| format!("EventDataID {}: bad EventDate", event_data_id))?;

        events.push(PricedEvent {
            customer_id,
            content_id,
            quantity,
            event_timestamp,
        });
    }

    tracing::info!(loaded_events = events.len(), "events loaded");
    Ok(events)
}

/// Load every price record, history included
pub fn load_prices(conn: &Connection) -> Result<Vec<PriceRecord>> {
    tracing::info!(stage = "LOAD", table = "ContentPrice", "loading content prices");

    let mut stmt = conn.prepare(
        "SELECT ContentPriceID, ContentID, CAST(Price AS TEXT), CAST(InsertDate AS TEXT)
         FROM ContentPrice
         ORDER BY ContentPriceID",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read ContentPrice rows")?;

    let mut prices = Vec::with_capacity(rows.len());
    for (record_id, content_id, price, inserted_at) in rows {
        let unit_price = parse_price(&price)
            .with_context(|| format!("ContentPriceID {}: bad Price", record_id))?;
        let inserted_at = parse_timestamp(&inserted_at)
            .with_context(|| format!("ContentPriceID {}: bad InsertDate", record_id))?;

        prices.push(PriceRecord {
            record_id,
            content_id,
            unit_price,
            inserted_at,
        });
    }

    tracing::info!(loaded_prices = prices.len(), "content prices loaded");
    Ok(prices)
}

/// Load contact records of one channel (email = 1)
pub fn load_contacts(conn: &Connection, channel_type_id: i64) -> Result<Vec<ContactRecord>> {
    tracing::info!(stage = "LOAD", table = "CustomerData", channel_type_id, "loading customer contacts");

    let mut stmt = conn.prepare(
        "SELECT CustomerChannelID, CustomerID, ChannelValue, CAST(InsertDate AS TEXT)
         FROM CustomerData
         WHERE ChannelTypeID = ?1
         ORDER BY CustomerChannelID",
    )?;

    let rows = stmt
        .query_map(params![channel_type_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read CustomerData rows")?;

    let mut contacts = Vec::with_capacity(rows.len());
    for (record_id, customer_id, contact_value, inserted_at) in rows {
        let inserted_at = parse_timestamp(&inserted_at)
            .with_context(|| format!("CustomerChannelID {}: bad InsertDate", record_id))?;

        contacts.push(ContactRecord {
            record_id,
            customer_id,
            contact_value,
            inserted_at,
        });
    }

    tracing::info!(loaded_contacts = contacts.len(), "customer contacts loaded");
    Ok(contacts)
}

/// Load all three streams; the first failure is fatal
pub fn load_all(conn: &Connection, config: &PipelineConfig) -> Result<SourceData, PipelineError> {
    let events = load_events(conn, config.since, config.event_type_id)
        .map_err(|e| PipelineError::load("events", e))?;
    let prices = load_prices(conn).map_err(|e| PipelineError::load("content prices", e))?;
    let contacts = load_contacts(conn, config.channel_type_id)
        .map_err(|e| PipelineError::load("customer contacts", e))?;

    Ok(SourceData {
        events,
        prices,
        contacts,
    })
}

// ============================================================================
// PARSING
// ============================================================================

/// Accepts "YYYY-MM-DD HH:MM:SS[.f]", "YYYY-MM-DDTHH:MM:SS[.f]", RFC 3339 and bare dates
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.naive_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }

    bail!("unrecognized timestamp '{}'", value)
}

/// Parse a non-negative price as stored by SQLite (text or real)
pub fn parse_price(value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    let price = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| anyhow!("unparseable price '{}': {}", value, e))?;

    if price.is_sign_negative() && !price.is_zero() {
        bail!("negative price {}", price);
    }

    Ok(price)
}

// ============================================================================
// SEEDING HELPERS
// ============================================================================

pub fn insert_event_row(
    conn: &Connection,
    customer_id: i64,
    content_id: i64,
    event_type_id: i64,
    event_date: &str,
    quantity: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO CustomerEventData (ContentID, CustomerID, EventTypeID, EventDate, Quantity)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![content_id, customer_id, event_type_id, event_date, quantity],
    )?;
    Ok(())
}

pub fn insert_price_row(conn: &Connection, content_id: i64, price: &str, inserted_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO ContentPrice (ContentID, Price, InsertDate) VALUES (?1, ?2, ?3)",
        params![content_id, price, inserted_at],
    )?;
    Ok(())
}

pub fn insert_contact_row(
    conn: &Connection,
    customer_id: i64,
    channel_type_id: i64,
    value: &str,
    inserted_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO CustomerData (CustomerID, ChannelTypeID, ChannelValue, InsertDate)
         VALUES (?1, ?2, ?3, ?4)",
        params![customer_id, channel_type_id, value, inserted_at],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
