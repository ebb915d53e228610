// Tenant price lists and proposed-price validation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ExternalServiceError, ValidationError};
use crate::model::{ItemKey, Money, TenantId};

const BPS_SCALE: i128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub description: Option<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            unit_price,
            description: None,
        }
    }
}

/// One tenant's price list, indexed by normalized item name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: HashMap<ItemKey, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries with the same normalized name replace earlier ones.
    /// Entries whose name normalizes to nothing are skipped.
    pub fn with_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.insert(entry);
        }
        catalog
    }

    pub fn insert(&mut self, entry: CatalogEntry) -> bool {
        match ItemKey::normalize(&entry.name) {
            Some(key) => {
                self.entries.insert(key, entry);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, key: &ItemKey) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }
}

/// What a proposed line turns into after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub name: String,
    pub unit_price: Money,
    pub catalog_ref: Option<Uuid>,
}

/// A price claim to check against the catalog.
#[derive(Debug, Clone, Copy)]
pub struct PriceClaim<'a> {
    pub key: &'a ItemKey,
    pub name: &'a str,
    pub unit_price: Money,
    pub manual_override: bool,
}

/// Resolves proposed names to catalog entries and rejects prices that drift
/// more than `tolerance_bps` from the catalog price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogPriceResolver {
    pub tolerance_bps: u32,
    pub allow_uncataloged: bool,
}

impl Default for CatalogPriceResolver {
    fn default() -> Self {
        Self {
            tolerance_bps: 1_000,
            allow_uncataloged: false,
        }
    }
}

impl CatalogPriceResolver {
    pub fn new(tolerance_bps: u32, allow_uncataloged: bool) -> Self {
        Self {
            tolerance_bps,
            allow_uncataloged,
        }
    }

    pub fn within_tolerance(&self, proposed: Money, catalog: Money) -> bool {
        let diff = (i128::from(proposed.cents()) - i128::from(catalog.cents())).abs();
        diff * BPS_SCALE <= i128::from(catalog.cents()).abs() * i128::from(self.tolerance_bps)
    }

    pub fn resolve(
        &self,
        catalog: &Catalog,
        claim: PriceClaim<'_>,
    ) -> Result<ResolvedPrice, ValidationError> {
        // Discount lines are never catalog items.
        if claim.unit_price.is_negative() {
            return Ok(ResolvedPrice {
                name: claim.name.to_string(),
                unit_price: claim.unit_price,
                catalog_ref: None,
            });
        }

        match catalog.lookup(claim.key) {
            Some(entry) => {
                if !claim.manual_override && !self.within_tolerance(claim.unit_price, entry.unit_price)
                {
                    return Err(ValidationError::PriceOutOfTolerance {
                        item: claim.name.to_string(),
                        proposed: claim.unit_price,
                        catalog: entry.unit_price,
                        tolerance_bps: self.tolerance_bps,
                    });
                }
                Ok(ResolvedPrice {
                    name: entry.name.clone(),
                    unit_price: claim.unit_price,
                    catalog_ref: Some(entry.id),
                })
            }
            None if claim.manual_override || self.allow_uncataloged => Ok(ResolvedPrice {
                name: claim.name.to_string(),
                unit_price: claim.unit_price,
                catalog_ref: None,
            }),
            None => Err(ValidationError::NotInCatalog(claim.name.to_string())),
        }
    }
}

/// Where tenant catalogs come from. Lookups may block on I/O.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn catalog_for(&self, tenant_id: TenantId) -> Result<Catalog, ExternalServiceError>;
}

/// Catalogs held in memory. Unknown tenants get an empty catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalogs {
    catalogs: RwLock<HashMap<TenantId, Catalog>>,
}

impl InMemoryCatalogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, tenant_id: TenantId, catalog: Catalog) {
        self.catalogs.write().await.insert(tenant_id, catalog);
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalogs {
    async fn catalog_for(&self, tenant_id: TenantId) -> Result<Catalog, ExternalServiceError> {
        Ok(self
            .catalogs
            .read()
            .await
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
