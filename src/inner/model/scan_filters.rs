use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inner::conf::model::filter::{evaluate_optional_name, Filter};
use crate::inner::conf::traits::Evaluate;
use crate::inner::model::peripheral::Peripheral;

/// Narrows sightings and registry listings. The default accepts everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScanFilters {
    /// A peripheral matches when it advertises any of these
    #[serde(default)]
    pub services: Vec<Uuid>,
    pub name: Option<Filter>,
}

impl ScanFilters {
    pub fn by_service(service: Uuid) -> Self {
        Self {
            services: vec![service],
            name: None,
        }
    }

    pub fn by_name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            services: vec![],
            name: Some(Filter::StartsWith(prefix.into())),
        }
    }
}

impl Evaluate<&Peripheral, bool> for ScanFilters {
    fn evaluate(&self, source: &Peripheral) -> bool {
        let services_match = self.services.is_empty() || self.services.iter().any(|uuid| source.advertises(uuid));
        services_match && evaluate_optional_name(self.name.as_ref(), source.name.as_deref())
    }
}
