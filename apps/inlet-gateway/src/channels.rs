use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use inlet_core::{Channel, ChannelUuid};
use inlet_store::{ChannelSource, SharedStore, StoreError};
use tracing::warn;

/// Channel lookups for live traffic.
///
/// The store stays authoritative; the last channel read for a UUID is kept so
/// callbacks can still be accepted (and spooled) while the store is down or
/// slower than `lookup_timeout`.
#[derive(Clone)]
pub struct ChannelCache {
    source: SharedStore,
    lookup_timeout: Duration,
    cached: Arc<DashMap<ChannelUuid, Channel>>,
}

impl ChannelCache {
    pub fn new(source: SharedStore, lookup_timeout: Duration) -> Self {
        Self {
            source,
            lookup_timeout,
            cached: Arc::new(DashMap::new()),
        }
    }

    pub fn prime(&self, channel: Channel) {
        self.cached.insert(channel.uuid, channel);
    }

    pub async fn get(&self, uuid: ChannelUuid) -> Result<Option<Channel>, StoreError> {
        let looked_up = tokio::time::timeout(self.lookup_timeout, self.source.channel_by_uuid(uuid))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable(format!(
                    "channel lookup timed out after {:?}",
                    self.lookup_timeout
                )))
            });
        match looked_up {
            Ok(Some(channel)) => {
                self.cached.insert(uuid, channel.clone());
                Ok(Some(channel))
            }
            Ok(None) => {
                self.cached.remove(&uuid);
                Ok(None)
            }
            Err(err) => match self.cached.get(&uuid) {
                Some(channel) => {
                    warn!(channel_uuid = %uuid, error = %err, "channel lookup failed, using cached channel");
                    Ok(Some(channel.clone()))
                }
                None => Err(err),
            },
        }
    }
}
