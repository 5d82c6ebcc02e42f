//! Foreign reference resolution during row materialization

use super::DynTable;
use crate::entity::{AnyRecord, Field};
use crate::schema::ForeignKind;
use crate::value::{SqlValue, decode_list, decode_map};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

/// Turn the stored form of a foreign column into live records of `target`.
///
/// `NULL` and blank text resolve to the empty shape of `kind`. Ids that
/// resolve to nothing are dropped with a warning.
pub(crate) async fn resolve_foreign(
    target: Arc<dyn DynTable>,
    kind: ForeignKind,
    stored: SqlValue,
) -> Result<Field> {
    let Some(text) = stored.id_text() else {
        return Ok(empty(kind));
    };

    match kind {
        ForeignKind::One => {
            let record = target.fetch(&text).await;
            if record.is_none() {
                warn!(table = %target.name(), id = %text, "Referenced object not found");
            }
            Ok(Field::One(record))
        }
        ForeignKind::List => {
            let ids = decode_list(&text);
            let slots = fetch_all(&target, &ids).await;
            Ok(Field::List(slots.into_iter().flatten().collect()))
        }
        ForeignKind::Map => {
            let entries = decode_map(&text)?;
            let (keys, ids): (Vec<String>, Vec<String>) = entries.into_iter().unzip();
            let slots = fetch_all(&target, &ids).await;
            let resolved: BTreeMap<String, AnyRecord> = keys
                .into_iter()
                .zip(slots)
                .filter_map(|(key, slot)| slot.map(|record| (key, record)))
                .collect();
            Ok(Field::Map(resolved))
        }
    }
}

fn empty(kind: ForeignKind) -> Field {
    match kind {
        ForeignKind::One => Field::One(None),
        ForeignKind::List => Field::List(Vec::new()),
        ForeignKind::Map => Field::Map(BTreeMap::new()),
    }
}

/// Fetch every id concurrently; slot `i` holds the result for `ids[i]`.
async fn fetch_all(target: &Arc<dyn DynTable>, ids: &[String]) -> Vec<Option<AnyRecord>> {
    let mut slots: Vec<Option<AnyRecord>> = vec![None; ids.len()];
    let mut tasks = JoinSet::new();

    for (idx, id) in ids.iter().enumerate() {
        let target = Arc::clone(target);
        let id = id.clone();
        tasks.spawn(async move {
            let record = target.fetch(&id).await;
            (idx, id, record)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, _, Some(record))) => slots[idx] = Some(record),
            Ok((_, id, None)) => {
                warn!(table = %target.name(), id = %id, "Referenced object not found; dropping it");
            }
            Err(e) => {
                warn!(table = %target.name(), error = %e, "Foreign lookup task failed");
            }
        }
    }
    slots
}
