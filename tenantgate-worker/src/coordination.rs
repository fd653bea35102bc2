/// Store behind the scheduler locks
///
/// | `REDIS_URL` | `single_replica` | Store |
/// |-------------|------------------|-------|
/// | set | any | Redis; must answer a ping at startup |
/// | unset | `true` | in-process, exclusive within this process only |
/// | unset | `false` | startup error |
///
/// Replicas that each hold their own in-process store all win every lock,
/// so the in-process store needs the explicit opt-in.

use std::sync::Arc;
use tenantgate_shared::store::{MemoryStore, RedisStore, SharedStore, StoreConfig};

pub async fn lock_store(
    store_config: Option<StoreConfig>,
    single_replica: bool,
) -> anyhow::Result<Arc<dyn SharedStore>> {
    match store_config {
        Some(store_config) => {
            let store = RedisStore::connect(store_config).await?;
            store.ping().await?;
            Ok(Arc::new(store) as Arc<dyn SharedStore>)
        }
        None if single_replica => {
            tracing::warn!("No shared store configured, coordinating in-process (single replica only)");
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn SharedStore>)
        }
        None => anyhow::bail!(
            "REDIS_URL is required to coordinate worker replicas; \
             set WORKER__SINGLE_REPLICA=true to run a single worker without it"
        ),
    }
}
