//! Structured operation logging, one logger per collection.
//!
//! Every store round trip emits an INFO `START` entry and an INFO `OK` entry
//! carrying `duration_ms`, or an ERROR entry on failure. Entries share the
//! `op`, `status` and `collection` fields.

use std::fmt::Display;
use std::time::Instant;

use tracing::{error, info};

use crate::error::DaoError;

/// Logged operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    InsertOne,
    InsertMany,
    FindOne,
    Count,
    Search,
    SearchStream,
    Distinct,
    Aggregate,
    UpdateOne,
    UpsertOne,
    DeleteOne,
    DeleteMany,
    CreateIndex,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::InsertOne => "insert_one",
            Operation::InsertMany => "insert_many",
            Operation::FindOne => "find_one",
            Operation::Count => "count",
            Operation::Search => "search",
            Operation::SearchStream => "search_stream",
            Operation::Distinct => "distinct",
            Operation::Aggregate => "aggregate",
            Operation::UpdateOne => "update_one",
            Operation::UpsertOne => "upsert_one",
            Operation::DeleteOne => "delete_one",
            Operation::DeleteMany => "delete_many",
            Operation::CreateIndex => "create_index",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OperationLogger {
    collection: &'static str,
}

impl OperationLogger {
    pub fn new(collection: &'static str) -> Self {
        Self { collection }
    }

    pub fn start(&self, op: Operation, detail: &dyn Display) -> Instant {
        info!(
            op = op.as_str(),
            status = "START",
            collection = self.collection,
            detail = %detail,
        );
        Instant::now()
    }

    pub fn ok(&self, op: Operation, started: Instant, detail: &dyn Display) {
        info!(
            op = op.as_str(),
            status = "OK",
            collection = self.collection,
            duration_ms = started.elapsed().as_millis() as u64,
            detail = %detail,
        );
    }

    pub fn ok_with_count(&self, op: Operation, started: Instant, detail: &dyn Display, count: u64) {
        info!(
            op = op.as_str(),
            status = "OK",
            collection = self.collection,
            duration_ms = started.elapsed().as_millis() as u64,
            result_count = count,
            detail = %detail,
        );
    }

    pub fn error(&self, op: Operation, started: Instant, detail: &dyn Display, err: &DaoError) {
        error!(
            op = op.as_str(),
            status = "ERROR",
            collection = self.collection,
            duration_ms = started.elapsed().as_millis() as u64,
            detail = %detail,
            error = %err,
        );
    }

    /// Log START, run `f`, then log OK or ERROR.
    pub fn run<T>(
        &self,
        op: Operation,
        detail: &dyn Display,
        f: impl FnOnce() -> Result<T, DaoError>,
    ) -> Result<T, DaoError> {
        let started = self.start(op, detail);
        match f() {
            Ok(value) => {
                self.ok(op, started, detail);
                Ok(value)
            }
            Err(err) => {
                self.error(op, started, detail, &err);
                Err(err)
            }
        }
    }
}
