pub mod calendar;
pub mod couple;
pub mod middleware;
pub mod pairing;

use std::sync::Arc;

use tandem_core::entitlement::EntitlementResolver;
use tandem_core::pairing::PairingLedger;
use tandem_core::remote::ImageStore;
use tandem_core::sync::SyncCoordinator;
use tandem_core::timeline::TimelineStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub ledger: PairingLedger,
    pub resolver: EntitlementResolver,
    pub timeline: Arc<TimelineStore>,
    pub sync: SyncCoordinator,
    pub store: Arc<dyn ImageStore>,
}
