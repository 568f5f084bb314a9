use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use blem_types::{AbortReason, Characteristic, uuids::display_uuid};

use crate::operation::{OpContext, OpResponse, Operation};
use crate::transport::TransportResult;

/// Discovers the configured auto-discover services and their characteristics.
///
/// Pushed to the front of the queue on every transition into `Connected`.
/// Completes once every awaited service has reported its characteristics.
pub(crate) struct DiscoverServicesOp {
    waiting_for_services: HashSet<Uuid>,
}

impl DiscoverServicesOp {
    pub(crate) fn new() -> Self {
        Self {
            waiting_for_services: HashSet::new(),
        }
    }

    fn progress(&self) -> OpResponse {
        if self.waiting_for_services.is_empty() {
            OpResponse::Complete
        } else {
            OpResponse::InProgress
        }
    }
}

impl Operation for DiscoverServicesOp {
    fn name(&self) -> &'static str {
        "discover_services"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        let services = ctx.auto_discover_services();
        if services.is_empty() {
            return OpResponse::Complete;
        }

        self.waiting_for_services = services.iter().copied().collect();
        ctx.transport().discover_services(ctx.peripheral_id(), services);
        OpResponse::InProgress
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        debug!(%reason, pending = self.waiting_for_services.len(), "Service discovery aborted");
    }

    fn on_services_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        result: &TransportResult<Vec<Uuid>>,
    ) -> OpResponse {
        let found = match result {
            Ok(found) => found,
            Err(e) => {
                warn!(device = %ctx.peripheral_id(), "Service discovery failed: {}", e);
                return OpResponse::Complete;
            }
        };

        // Services the device did not report will never answer.
        self.waiting_for_services.retain(|service| found.contains(service));

        for service in found.iter().filter(|s| self.waiting_for_services.contains(s)) {
            ctx.transport().discover_characteristics(ctx.peripheral_id(), *service);
        }

        self.progress()
    }

    fn on_characteristics_discovered(
        &mut self,
        ctx: &mut OpContext<'_>,
        service: Uuid,
        result: &TransportResult<Vec<Characteristic>>,
    ) -> OpResponse {
        if !self.waiting_for_services.remove(&service) {
            debug!(service = %display_uuid(&service), "Ignoring characteristics for service not awaited");
            return self.progress();
        }

        match result {
            Ok(found) => {
                debug!(
                    service = %display_uuid(&service),
                    count = found.len(),
                    "Characteristics discovered"
                );
                ctx.add_characteristics(found.iter().cloned());
            }
            Err(e) => {
                warn!(
                    device = %ctx.peripheral_id(),
                    service = %display_uuid(&service),
                    "Characteristic discovery failed: {}", e
                );
            }
        }

        self.progress()
    }
}

#[cfg(test)]
mod tests {
    use blem_types::{CharProperties, uuids};

    use super::*;
    use crate::error::TransportError;
    use crate::mock::TransportCall;
    use crate::queue::tests::Harness;

    fn characteristic(uuid: Uuid, service: Uuid) -> Characteristic {
        Characteristic::new(uuid, service, CharProperties::READ)
    }

    #[test]
    fn test_completes_immediately_without_services() {
        let mut harness = Harness::new();
        let mut op = DiscoverServicesOp::new();

        assert_eq!(op.start(&mut harness.ctx()), OpResponse::Complete);
        assert!(harness.transport.calls().is_empty());
    }

    #[test]
    fn test_discovers_only_awaited_services() {
        let s1 = uuids::BATTERY_SERVICE;
        let s2 = uuids::DEVICE_INFO_SERVICE;
        let mut harness = Harness::new();
        harness.auto_discover = vec![s1];
        let mut op = DiscoverServicesOp::new();

        assert_eq!(op.start(&mut harness.ctx()), OpResponse::InProgress);
        assert_eq!(
            op.on_services_discovered(&mut harness.ctx(), &Ok(vec![s1, s2])),
            OpResponse::InProgress
        );

        let calls = harness.transport.calls();
        assert_eq!(
            calls,
            vec![
                TransportCall::DiscoverServices {
                    id: harness.id.clone(),
                    services: vec![s1],
                },
                TransportCall::DiscoverCharacteristics {
                    id: harness.id.clone(),
                    service: s1,
                },
            ]
        );

        // S2 answering must not complete the op.
        let s2_chars = Ok(vec![characteristic(uuids::MODEL_NUMBER, s2)]);
        assert_eq!(
            op.on_characteristics_discovered(&mut harness.ctx(), s2, &s2_chars),
            OpResponse::InProgress
        );

        let s1_chars = Ok(vec![characteristic(uuids::BATTERY_LEVEL, s1)]);
        assert_eq!(
            op.on_characteristics_discovered(&mut harness.ctx(), s1, &s1_chars),
            OpResponse::Complete
        );
        assert_eq!(harness.characteristics.len(), 1);
        assert_eq!(harness.characteristics[0].uuid, uuids::BATTERY_LEVEL);
    }

    #[test]
    fn test_unreported_services_are_dropped() {
        let s1 = uuids::BATTERY_SERVICE;
        let mut harness = Harness::new();
        harness.auto_discover = vec![s1, uuids::HEART_RATE_SERVICE];
        let mut op = DiscoverServicesOp::new();
        op.start(&mut harness.ctx());

        op.on_services_discovered(&mut harness.ctx(), &Ok(vec![s1]));
        let done = op.on_characteristics_discovered(&mut harness.ctx(), s1, &Ok(vec![]));

        assert_eq!(done, OpResponse::Complete);
    }

    #[test]
    fn test_no_matching_services_completes() {
        let mut harness = Harness::new();
        harness.auto_discover = vec![uuids::HEART_RATE_SERVICE];
        let mut op = DiscoverServicesOp::new();
        op.start(&mut harness.ctx());

        let response = op.on_services_discovered(&mut harness.ctx(), &Ok(vec![uuids::GAP_SERVICE]));

        assert_eq!(response, OpResponse::Complete);
    }

    #[test]
    fn test_service_error_completes() {
        let mut harness = Harness::new();
        harness.auto_discover = vec![uuids::BATTERY_SERVICE];
        let mut op = DiscoverServicesOp::new();
        op.start(&mut harness.ctx());

        let response = op.on_services_discovered(
            &mut harness.ctx(),
            &Err(TransportError::new("insufficient authentication")),
        );

        assert_eq!(response, OpResponse::Complete);
    }

    #[test]
    fn test_characteristic_error_removes_service() {
        let s1 = uuids::BATTERY_SERVICE;
        let s2 = uuids::DEVICE_INFO_SERVICE;
        let mut harness = Harness::new();
        harness.auto_discover = vec![s1, s2];
        let mut op = DiscoverServicesOp::new();
        op.start(&mut harness.ctx());
        op.on_services_discovered(&mut harness.ctx(), &Ok(vec![s1, s2]));

        let response =
            op.on_characteristics_discovered(&mut harness.ctx(), s1, &Err(TransportError::new("timeout")));
        assert_eq!(response, OpResponse::InProgress);

        let response = op.on_characteristics_discovered(
            &mut harness.ctx(),
            s2,
            &Ok(vec![characteristic(uuids::SERIAL_NUMBER, s2)]),
        );
        assert_eq!(response, OpResponse::Complete);
        assert_eq!(harness.characteristics.len(), 1);
    }
}
