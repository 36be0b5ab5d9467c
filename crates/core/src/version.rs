//! Optimistic concurrency on task records.

use crate::error::{DomainError, DomainResult};

/// Version a conditional write of a task record expects to replace.
///
/// Every status transition bumps `Task::version`; stores that cannot hold a
/// lock across read and write use this to detect interleaved writers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.0 == actual {
            Ok(())
        } else {
            Err(DomainError::Conflict {
                expected: self.0,
                actual,
            })
        }
    }
}
