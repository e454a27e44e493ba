// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use mz_remote_sql_proto::{BatchResult, CursorEntry, ExecuteResult};
use tracing::trace;

use crate::error::Error;

/// Assembles the entries of a cursor response into a [`BatchResult`].
///
/// Entries must follow the per-step order `StepBegin`, `Row`*, then `StepEnd`
/// or `StepError`. A `StepError` may also arrive without a preceding
/// `StepBegin`, when a step fails before producing any columns.
#[derive(Debug)]
pub struct BatchCollector {
    result: BatchResult,
    /// The step that has begun but not yet ended.
    current: Option<(usize, ExecuteResult)>,
}

impl BatchCollector {
    /// Creates a collector for a batch of `step_count` steps.
    pub fn new(step_count: usize) -> BatchCollector {
        BatchCollector {
            result: BatchResult {
                step_results: vec![None; step_count],
                step_errors: vec![None; step_count],
            },
            current: None,
        }
    }

    /// Applies the next entry.
    ///
    /// Returns [`Error::Server`] for a [`CursorEntry::Error`] and
    /// [`Error::ProtocolViolation`] for an entry that is out of order.
    pub fn push(&mut self, entry: CursorEntry) -> Result<(), Error> {
        match entry {
            CursorEntry::StepBegin { step, cols } => {
                if let Some((current, _)) = &self.current {
                    return Err(Error::protocol(format!(
                        "step {step} began before step {current} ended"
                    )));
                }
                self.check_unreported(step)?;
                let result = ExecuteResult {
                    cols,
                    rows: Vec::new(),
                    affected_row_count: 0,
                    last_insert_rowid: None,
                };
                self.current = Some((step, result));
            }
            CursorEntry::Row { row } => match &mut self.current {
                Some((_, result)) => result.rows.push(row),
                None => return Err(Error::protocol("row received outside of a step")),
            },
            CursorEntry::StepEnd {
                affected_row_count,
                last_insert_rowid,
            } => {
                let Some((step, mut result)) = self.current.take() else {
                    return Err(Error::protocol("step ended before it began"));
                };
                result.affected_row_count = affected_row_count;
                result.last_insert_rowid = last_insert_rowid;
                self.result.step_results[step] = Some(result);
            }
            CursorEntry::StepError { step, error } => {
                match self.current.take() {
                    Some((current, _)) if current != step => {
                        return Err(Error::protocol(format!(
                            "step {step} failed while step {current} was running"
                        )));
                    }
                    Some(_) => (),
                    None => self.check_unreported(step)?,
                }
                self.result.step_errors[step] = Some(error);
            }
            CursorEntry::Error { error } => return Err(Error::Server(error)),
            CursorEntry::Unknown => trace!("ignoring unknown cursor entry"),
        }
        Ok(())
    }

    /// Returns the assembled result.
    pub fn finish(self) -> Result<BatchResult, Error> {
        match self.current {
            Some((step, _)) => Err(Error::protocol(format!(
                "cursor ended before step {step} finished"
            ))),
            None => Ok(self.result),
        }
    }

    fn check_unreported(&self, step: usize) -> Result<(), Error> {
        let step_count = self.result.step_results.len();
        if step >= step_count {
            return Err(Error::protocol(format!(
                "step {step} out of range for batch of {step_count} steps"
            )));
        }
        if self.result.step_results[step].is_some() || self.result.step_errors[step].is_some() {
            return Err(Error::protocol(format!("step {step} reported twice")));
        }
        Ok(())
    }
}
