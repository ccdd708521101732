//! JSONL audit trail.
//!
//! Every batch appends events to an audit.jsonl file, one JSON object per
//! line.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::batch::ExecutionBatch;
use crate::error::Result;
use crate::order::Order;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

fn order_json(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "client_order_id": order.key.client_order_id(),
        "symbol": order.symbol().as_str(),
        "side": order.side().to_string(),
        "size": order.size.to_string(),
        "state": order.state.to_string(),
        "venue_id": order.venue_id.map(|id| id.0),
        "filled": order.filled.to_string(),
        "reason": order.reason,
    })
}

pub fn log_batch_planned(audit: &mut AuditLog, batch: &ExecutionBatch) -> Result<()> {
    let orders: Vec<_> = batch.orders.iter().map(order_json).collect();
    audit.log(
        "batch_planned",
        serde_json::json!({
            "batch": batch.id.to_string(),
            "account": batch.account.to_string(),
            "kind": batch.kind.to_string(),
            "total_value": batch.plan.total_value.to_string(),
            "cash": batch.plan.cash.to_string(),
            "dust": batch.plan.dust,
            "orders": orders,
        }),
    )
}

pub fn log_order_submitted(audit: &mut AuditLog, order: &Order) -> Result<()> {
    audit.log("order_submitted", order_json(order))
}

pub fn log_order_terminal(audit: &mut AuditLog, order: &Order) -> Result<()> {
    audit.log("order_terminal", order_json(order))
}

fn batch_summary(batch: &ExecutionBatch) -> serde_json::Value {
    let executed: Vec<_> = {
        let mut rows: Vec<_> = batch.executed().into_iter().collect();
        rows.sort_by_key(|(symbol, _)| *symbol);
        rows.into_iter()
            .map(|(symbol, amount)| serde_json::json!({"symbol": symbol.as_str(), "executed": amount.to_string()}))
            .collect()
    };
    let states: Vec<_> = batch.orders.iter().map(order_json).collect();
    serde_json::json!({
        "batch": batch.id.to_string(),
        "account": batch.account.to_string(),
        "status": batch.status.to_string(),
        "executed": executed,
        "orders": states,
    })
}

pub fn log_batch_finished(audit: &mut AuditLog, batch: &ExecutionBatch) -> Result<()> {
    audit.log("batch_finished", batch_summary(batch))
}

pub fn log_batch_cancelled(audit: &mut AuditLog, batch: &ExecutionBatch) -> Result<()> {
    audit.log("batch_cancelled", batch_summary(batch))
}

pub fn log_batch_reconciled(audit: &mut AuditLog, batch: &ExecutionBatch) -> Result<()> {
    audit.log("batch_reconciled", batch_summary(batch))
}
