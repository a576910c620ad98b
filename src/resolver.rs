use tracing::{debug, warn};

use crate::cache::IdentifierCache;
use crate::domain::{ItemId, PropertyId};
use crate::error::SyncError;
use crate::sparql::{LookupOutcome, QueryClient};
use crate::store::ErrorLog;

/// Result of resolving one external identifier. `NotFound` is a sentinel,
/// never an error: the caller decides how to handle an unresolved id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Hit(ItemId),
    NotFound,
}

/// Cache-first identifier resolution. Confirmed single matches are written
/// to the injected cache; zero or ambiguous matches are logged and retried
/// on the next run.
pub struct IdentifierResolver {
    cache: IdentifierCache,
    miss_log: Option<ErrorLog>,
}

impl IdentifierResolver {
    pub fn new(cache: IdentifierCache, miss_log: Option<ErrorLog>) -> Self {
        Self { cache, miss_log }
    }

    pub fn resolve<Q: QueryClient + ?Sized>(
        &mut self,
        query: &Q,
        property: &PropertyId,
        value: &str,
    ) -> Result<Resolution, SyncError> {
        if let Some(item) = self.cache.get(property, value) {
            debug!(%property, value, %item, "cache hit");
            return Ok(Resolution::Hit(item.clone()));
        }

        match query.find_by_property_value(property, value)? {
            LookupOutcome::One(item) => {
                self.cache.insert(property, value, item.clone())?;
                Ok(Resolution::Hit(item))
            }
            LookupOutcome::None => {
                warn!(%property, value, "no item found");
                self.log_miss(property, value, "no match")?;
                Ok(Resolution::NotFound)
            }
            LookupOutcome::Ambiguous(count) => {
                warn!(%property, value, count, "ambiguous match");
                self.log_miss(property, value, &format!("{count} matches"))?;
                Ok(Resolution::NotFound)
            }
        }
    }

    pub fn flush(&mut self) -> Result<(), SyncError> {
        self.cache.flush()
    }

    fn log_miss(&self, property: &PropertyId, value: &str, reason: &str) -> Result<(), SyncError> {
        if let Some(log) = &self.miss_log {
            log.append(&format!("{property}\t{value}\t{reason}"))?;
        }
        Ok(())
    }
}
