use std::sync::Arc;

use dashmap::DashSet;
use inlet_core::MsgUuid;

/// Per-process markers for messages whose write is underway.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    claims: Arc<DashSet<MsgUuid>>,
}

impl InFlight {
    /// Claims `uuid`; `None` while another write of the same message holds it.
    pub(crate) fn claim(&self, uuid: MsgUuid) -> Option<InFlightGuard> {
        self.claims.insert(uuid).then(|| InFlightGuard {
            claims: Arc::clone(&self.claims),
            uuid,
        })
    }
}

pub(crate) struct InFlightGuard {
    claims: Arc<DashSet<MsgUuid>>,
    uuid: MsgUuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.claims.remove(&self.uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_released() {
        let in_flight = InFlight::default();
        let uuid = MsgUuid::new();
        let guard = in_flight.claim(uuid).unwrap();
        assert!(in_flight.claim(uuid).is_none());
        assert!(in_flight.claim(MsgUuid::new()).is_some());
        drop(guard);
        assert!(in_flight.claim(uuid).is_some());
    }
}
