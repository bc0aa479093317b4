use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{AggregateId, AggregateRoot, AuditInfo, Auditable, DomainError, RaisesEvents};
use stockroom_events::Event;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ProductId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Draft => "draft",
            ProductStatus::Active => "active",
            ProductStatus::Archived => "archived",
        }
    }
}

impl core::str::FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProductStatus::Draft),
            "active" => Ok(ProductStatus::Active),
            "archived" => Ok(ProductStatus::Archived),
            other => Err(DomainError::validation(format!("unknown product status: {other}"))),
        }
    }
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub event_id: Uuid,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub event_id: Uuid,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub event_id: Uuid,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_id(&self) -> Uuid {
        match self {
            ProductEvent::ProductCreated(e) => e.event_id,
            ProductEvent::ProductActivated(e) => e.event_id,
            ProductEvent::ProductArchived(e) => e.event_id,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductActivated(_) => "products.product.activated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

/// Persisted state of a product, used to rehydrate it from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub status: ProductStatus,
    pub audit: AuditInfo,
    pub version: u64,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    status: ProductStatus,
    audit: AuditInfo,
    version: u64,
    pending: Vec<ProductEvent>,
}

impl Product {
    /// Create a new product in `Draft` status.
    pub fn create(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let sku = sku.into();
        let name = name.into();

        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        if sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        // SKU uniqueness needs a storage lookup; the aggregate only checks shape.
        let created = ProductCreated {
            event_id: Uuid::now_v7(),
            product_id: id,
            sku: sku.clone(),
            name: name.clone(),
            occurred_at,
        };

        Ok(Self {
            id,
            sku,
            name,
            status: ProductStatus::Draft,
            audit: AuditInfo::default(),
            version: 0,
            pending: vec![ProductEvent::ProductCreated(created)],
        })
    }

    pub fn from_snapshot(snapshot: ProductSnapshot) -> Self {
        Self {
            id: snapshot.id,
            sku: snapshot.sku,
            name: snapshot.name,
            status: snapshot.status,
            audit: snapshot.audit,
            version: snapshot.version,
            pending: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            status: self.status,
            audit: self.audit.clone(),
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Only active products can be stocked.
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn activate(&mut self, occurred_at: DateTime<Utc>) -> Result<(), DomainError> {
        match self.status {
            ProductStatus::Active => Err(DomainError::conflict("product is already active")),
            ProductStatus::Archived => Err(DomainError::invariant(
                "archived products cannot be activated",
            )),
            ProductStatus::Draft => {
                self.status = ProductStatus::Active;
                self.pending
                    .push(ProductEvent::ProductActivated(ProductActivated {
                        event_id: Uuid::now_v7(),
                        product_id: self.id,
                        occurred_at,
                    }));
                Ok(())
            }
        }
    }

    pub fn archive(&mut self, occurred_at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        self.status = ProductStatus::Archived;
        self.pending.push(ProductEvent::ProductArchived(ProductArchived {
            event_id: Uuid::now_v7(),
            product_id: self.id,
            occurred_at,
        }));
        Ok(())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl RaisesEvents for Product {
    type Event = ProductEvent;

    fn pending_events(&self) -> &[Self::Event] {
        &self.pending
    }

    fn clear_events(&mut self) {
        self.pending.clear();
    }
}

impl Auditable for Product {
    fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn draft_product() -> Product {
        Product::create(test_product_id(), "SKU-001", "Test Product", test_time()).unwrap()
    }

    #[test]
    fn create_product_starts_in_draft_and_raises_created() {
        let product_id = test_product_id();
        let product = Product::create(product_id, "SKU-001", "Test Product", test_time()).unwrap();

        assert_eq!(product.status(), ProductStatus::Draft);
        assert!(!product.is_active());
        assert_eq!(product.version(), 0);
        assert_eq!(product.pending_events().len(), 1);

        match &product.pending_events()[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.product_id, product_id);
                assert_eq!(e.sku, "SKU-001");
                assert_eq!(e.name, "Test Product");
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn create_product_rejects_empty_name() {
        let err = Product::create(test_product_id(), "SKU-001", "   ", test_time()).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty name"),
        }
    }

    #[test]
    fn create_product_rejects_empty_sku() {
        let err = Product::create(test_product_id(), "  ", "Test Product", test_time()).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty SKU"),
        }
    }

    #[test]
    fn activate_product_from_draft() {
        let mut product = draft_product();
        product.clear_events();

        product.activate(test_time()).unwrap();

        assert!(product.is_active());
        assert!(matches!(
            product.pending_events(),
            [ProductEvent::ProductActivated(_)]
        ));
    }

    #[test]
    fn activate_product_rejects_already_active() {
        let mut product = draft_product();
        product.activate(test_time()).unwrap();

        let err = product.activate(test_time()).unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error for already active product"),
        }
    }

    #[test]
    fn activate_product_rejects_archived() {
        let mut product = draft_product();
        product.archive(test_time()).unwrap();

        let err = product.activate(test_time()).unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for archived product"),
        }
        assert_eq!(product.status(), ProductStatus::Archived);
    }

    #[test]
    fn archive_product_rejects_already_archived() {
        let mut product = draft_product();
        product.archive(test_time()).unwrap();
        let events_before = product.pending_events().len();

        let err = product.archive(test_time()).unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error for already archived product"),
        }
        assert_eq!(product.pending_events().len(), events_before);
    }

    #[test]
    fn archive_active_product_stops_it_being_stocked() {
        let mut product = draft_product();
        product.activate(test_time()).unwrap();
        product.archive(test_time()).unwrap();

        assert!(!product.is_active());
    }

    #[test]
    fn snapshot_round_trip_drops_pending_events() {
        let mut product = draft_product();
        product.activate(test_time()).unwrap();
        product.set_version(2);

        let restored = Product::from_snapshot(product.snapshot());

        assert_eq!(restored.status(), ProductStatus::Active);
        assert_eq!(restored.version(), 2);
        assert!(!restored.has_pending_events());
    }

    #[test]
    fn status_parses_from_its_storage_name() {
        for status in [ProductStatus::Draft, ProductStatus::Active, ProductStatus::Archived] {
            assert_eq!(status.as_str().parse::<ProductStatus>().unwrap(), status);
        }
        assert!("retired".parse::<ProductStatus>().is_err());
    }

    #[test]
    fn event_types_are_stable() {
        let mut product = draft_product();
        product.activate(test_time()).unwrap();
        product.archive(test_time()).unwrap();

        let types: Vec<_> = product
            .pending_events()
            .iter()
            .map(Event::event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "products.product.created",
                "products.product.activated",
                "products.product.archived",
            ]
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: a failed transition leaves status and pending events untouched.
            #[test]
            fn failed_transitions_do_not_mutate(
                sku in "[A-Z0-9]{1,20}",
                name in "[A-Za-z][A-Za-z0-9 ]{0,99}",
                steps in prop::collection::vec(any::<bool>(), 0..12)
            ) {
                let mut product = Product::create(test_product_id(), sku, name, Utc::now()).unwrap();

                for activate in steps {
                    let before = product.clone();
                    let result = if activate {
                        product.activate(Utc::now())
                    } else {
                        product.archive(Utc::now())
                    };

                    match result {
                        Ok(()) => prop_assert_eq!(
                            product.pending_events().len(),
                            before.pending_events().len() + 1
                        ),
                        Err(_) => prop_assert_eq!(&product, &before),
                    }
                }
            }

            /// Property: once archived a product never becomes active again.
            #[test]
            fn archived_is_terminal(
                steps in prop::collection::vec(any::<bool>(), 0..12)
            ) {
                let mut product = Product::create(test_product_id(), "SKU", "Name", Utc::now()).unwrap();
                product.archive(Utc::now()).unwrap();

                for activate in steps {
                    let _ = if activate {
                        product.activate(Utc::now())
                    } else {
                        product.archive(Utc::now())
                    };
                    prop_assert_eq!(product.status(), ProductStatus::Archived);
                }
            }
        }
    }
}
