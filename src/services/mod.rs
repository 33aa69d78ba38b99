//! Business logic services

pub mod catalog;
pub mod ledger;
pub mod loans;

use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub loans: loans::LoansService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    pub fn with_clock(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog: catalog::CatalogService::new(repository.clone(), clock.clone()),
            loans: loans::LoansService::new(repository, clock),
        }
    }
}
