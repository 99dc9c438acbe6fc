//! Change-record dispatch.
//!
//! Classifies each change record by its table, its discriminator, and its
//! event type, then enqueues one message per matching handler.

use std::sync::Arc;

use tracing::{debug, error};

use super::{HandlerQueue, Result};
use crate::ir::CdcEvent;
use crate::repository::RepositoryRegistry;
use crate::stream::{BatchResponse, ChangeRecord};

/// Where one handler's change records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub handler_id: String,
    pub source_model: String,
    /// Physical table of the source model.
    pub table: String,
    pub event: CdcEvent,
}

impl Route {
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        record.table == self.table
            && record.event_type.matches(self.event)
            && record.entity_type() == Some(self.source_model.as_str())
    }
}

/// Routes change records to per-handler queues.
pub struct Dispatcher {
    routes: Vec<Route>,
    queue: Arc<dyn HandlerQueue>,
}

impl Dispatcher {
    /// One route per change-capture declaration of the registry's IR.
    pub fn new(registry: &RepositoryRegistry, queue: Arc<dyn HandlerQueue>) -> Self {
        let routes = registry
            .ir()
            .change_data_capture()
            .filter_map(|config| {
                let model = registry.ir().model(&config.source_model_name)?;
                Some(Route {
                    handler_id: config.handler_id(),
                    source_model: config.source_model_name.clone(),
                    table: registry.physical_table(&model.table_name),
                    event: config.event,
                })
            })
            .collect();
        Self { routes, queue }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Handlers a record is routed to.
    pub fn routes_for<'a>(&'a self, record: &'a ChangeRecord) -> impl Iterator<Item = &'a Route> {
        self.routes.iter().filter(move |route| route.matches(record))
    }

    /// Enqueue a record for every matching handler; returns the number of
    /// messages sent.
    pub async fn dispatch(&self, record: ChangeRecord) -> Result<usize> {
        let record = Arc::new(record);
        let mut sent = 0;
        for route in self.routes_for(&record) {
            self.queue
                .send(&route.handler_id, Arc::clone(&record))
                .await?;
            sent += 1;
        }
        debug!(
            event_id = %record.event_id,
            table = %record.table,
            event_type = %record.event_type,
            entity_type = ?record.entity_type(),
            handlers = sent,
            "Dispatched change record"
        );
        Ok(sent)
    }

    /// Dispatch a stream batch, reporting only the records that could not
    /// be enqueued.
    pub async fn dispatch_batch(&self, records: Vec<ChangeRecord>) -> BatchResponse {
        let mut response = BatchResponse::default();
        for record in records {
            let event_id = record.event_id.clone();
            if let Err(e) = self.dispatch(record).await {
                error!(event_id = %event_id, error = %e, "Failed to dispatch change record");
                response.fail(event_id);
            }
        }
        response
    }
}
