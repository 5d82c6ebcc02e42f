//! Invalidation listeners
//!
//! A listener drains the bus and hands each foreign message to a settle
//! task: sleep for the settle delay, evict, and on SAVE fetch again. Only
//! objects that are cached when the delay ends are touched.

use super::{Invalidation, UpdateType};
use crate::registry::Context;
use crate::table::DynTable;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Maps the table name of a message to the table it invalidates.
pub(crate) trait TableResolver: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Option<Arc<dyn DynTable>>;
}

/// Resolves only the one table it was created for.
pub(crate) struct SingleTable {
    name: String,
    table: Weak<dyn DynTable>,
}

impl SingleTable {
    pub(crate) fn new(table: &Arc<dyn DynTable>) -> Self {
        Self {
            name: table.name().to_string(),
            table: Arc::downgrade(table),
        }
    }
}

impl TableResolver for SingleTable {
    fn resolve(&self, name: &str) -> Option<Arc<dyn DynTable>> {
        if !self.name.eq_ignore_ascii_case(name) {
            return None;
        }
        self.table.upgrade()
    }
}

/// Start a listener task. Returns false when no bus is attached.
pub(crate) fn spawn(ctx: &Arc<Context>, resolver: Arc<dyn TableResolver>) -> bool {
    let Some(bus) = ctx.bus.clone() else {
        warn!("No invalidation bus attached; not listening");
        return false;
    };
    let mut rx = bus.subscribe();
    let listener_ctx = Arc::clone(ctx);

    let handle = tokio::spawn(async move {
        let ctx = listener_ctx;
        loop {
            let envelope = match rx.recv().await {
                Ok(envelope) => envelope,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Invalidation listener fell behind; messages lost");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if envelope.channel != ctx.channel || envelope.origin == ctx.node {
                continue;
            }

            let message = match Invalidation::decode(&envelope.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable invalidation");
                    continue;
                }
            };
            let Some(table) = resolver.resolve(&message.table_name) else {
                debug!(table = %message.table_name, "Ignoring invalidation for an unknown table");
                continue;
            };

            tokio::spawn(settle(Arc::clone(&ctx), table, message));
        }
        debug!("Invalidation listener stopped");
    });

    ctx.track_listener(handle);
    true
}

async fn settle(ctx: Arc<Context>, table: Arc<dyn DynTable>, message: Invalidation) {
    tokio::time::sleep(ctx.settle_delay).await;
    if ctx.is_closed() {
        return;
    }
    if !table.evict_key(&message.object_id) {
        debug!(
            table = %table.name(),
            id = %message.object_id,
            "Invalidated object is not cached"
        );
        return;
    }
    debug!(table = %table.name(), id = %message.object_id, update = %message.update_type, "Evicted");

    if message.update_type == UpdateType::Save && !table.refetch(&message.object_id).await {
        warn!(
            table = %table.name(),
            id = %message.object_id,
            "Saved object could not be fetched again"
        );
    }
}
