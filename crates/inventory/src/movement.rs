use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{DomainError, Entity};

/// Stock movement identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Why a stock quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    InitialStock,
    AdjustmentIncrease,
    AdjustmentDecrease,
    Transfer,
    Sale,
    Return,
    Damage,
    Receipt,
}

impl MovementType {
    pub const ALL: [MovementType; 8] = [
        MovementType::InitialStock,
        MovementType::AdjustmentIncrease,
        MovementType::AdjustmentDecrease,
        MovementType::Transfer,
        MovementType::Sale,
        MovementType::Return,
        MovementType::Damage,
        MovementType::Receipt,
    ];

    /// Storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::InitialStock => "initial_stock",
            MovementType::AdjustmentIncrease => "adjustment_increase",
            MovementType::AdjustmentDecrease => "adjustment_decrease",
            MovementType::Transfer => "transfer",
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::Damage => "damage",
            MovementType::Receipt => "receipt",
        }
    }

    /// Reason recorded when the caller gives none.
    pub fn default_reason(self) -> &'static str {
        match self {
            MovementType::InitialStock => "stock received",
            MovementType::AdjustmentIncrease => "stock adjusted up",
            MovementType::AdjustmentDecrease => "stock adjusted down",
            MovementType::Transfer => "stock transferred",
            MovementType::Sale => "stock sold",
            MovementType::Return => "stock returned",
            MovementType::Damage => "stock damaged",
            MovementType::Receipt => "stock receipt",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type: {s}")))
    }
}

/// One entry in an inventory's append-only movement history.
///
/// `quantity` is the signed change applied to the quantity on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub reason: String,
    pub completed: bool,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub(crate) fn completed(
        movement_type: MovementType,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            movement_type,
            quantity,
            reason: movement_type.default_reason().to_string(),
            completed: true,
            occurred_at,
        }
    }

    /// Replace the default reason; blank text keeps it.
    pub(crate) fn with_reason(mut self, reason: Option<&str>) -> Self {
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            self.reason = reason.to_string();
        }
        self
    }

    /// Size of the change, regardless of direction.
    pub fn magnitude(&self) -> Decimal {
        self.quantity.abs()
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_type_round_trips_through_storage_name() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_movement_type_is_a_validation_error() {
        match "teleport".parse::<MovementType>() {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("teleport")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn magnitude_ignores_direction() {
        let m = StockMovement::completed(MovementType::AdjustmentDecrease, Decimal::from(-85), Utc::now());
        assert_eq!(m.magnitude(), Decimal::from(85));
        assert!(m.completed);
        assert_eq!(m.reason, "stock adjusted down");
    }
}
