//! Remote state resolution

use std::collections::BTreeSet;
use store::ObjectStore;
use sv_core::{Error, Result, SnapshotName};
use tracing::debug;

/// Names of the snapshots already archived in `container`
///
/// Objects whose names do not decode as snapshot names are not ours and are
/// skipped. Any listing failure is fatal for the run.
pub async fn list_archived(
    store: &dyn ObjectStore,
    container: &str,
    prefix: Option<&str>,
) -> Result<BTreeSet<SnapshotName>> {
    let names = store
        .list(container, prefix)
        .await
        .map_err(|e| Error::RemoteUnavailable(format!("cannot list container {:?}: {}", container, e)))?;

    let mut archived = BTreeSet::new();
    for name in names {
        match SnapshotName::parse(name.as_str()) {
            Ok(parsed) => {
                archived.insert(parsed);
            }
            Err(e) => debug!("Ignoring foreign object {:?}: {}", name, e),
        }
    }

    debug!("{} snapshot(s) already archived in {}", archived.len(), container);
    Ok(archived)
}
