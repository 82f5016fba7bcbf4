use tracing::{debug, warn};

use crate::{host::Host, types::SwitchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub driven: usize,
    pub failed: usize,
}

/// Drives every switch to `desired`, whatever state it is in now.
///
/// A failing switch is logged and counted; the rest are still driven.
pub fn apply<H: Host + ?Sized>(switches: &[String], desired: SwitchState, host: &H) -> ApplyReport {
    let mut report = ApplyReport::default();

    for entity_id in switches {
        debug!(switch = %entity_id, state = desired.as_str(), "driving switch");
        match host.set_switch(entity_id, desired) {
            Ok(()) => report.driven += 1,
            Err(err) => {
                warn!(switch = %entity_id, "failed to set switch {}: {err}", desired.as_str());
                report.failed += 1;
            }
        }
    }

    report
}
