//! Audit trail fields shared by persisted aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;
use crate::value_object::ValueObject;

/// Who created / last updated / soft-deleted a record, and when.
///
/// Stamped by the unit of work at save time, never by domain logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_by: Option<UserId>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ValueObject for AuditInfo {}

impl AuditInfo {
    /// Stamp the record for a save performed by `actor` at `at`.
    ///
    /// - first save: creation fields
    /// - later saves: update fields
    /// - soft-deleted and not yet stamped: deletion fields
    pub fn stamp(&mut self, actor: Option<UserId>, at: DateTime<Utc>, deleted: bool) {
        if self.created_at.is_none() {
            self.created_by = actor;
            self.created_at = Some(at);
        } else {
            self.updated_by = actor;
            self.updated_at = Some(at);
        }

        if deleted && self.deleted_at.is_none() {
            self.deleted_by = actor;
            self.deleted_at = Some(at);
        }
    }
}

/// Aggregates carrying audit fields and a soft-delete flag.
pub trait Auditable {
    fn audit(&self) -> &AuditInfo;

    fn audit_mut(&mut self) -> &mut AuditInfo;

    fn is_deleted(&self) -> bool {
        false
    }

    fn stamp_audit(&mut self, actor: Option<UserId>, at: DateTime<Utc>) {
        let deleted = self.is_deleted();
        self.audit_mut().stamp(actor, at, deleted);
    }
}
