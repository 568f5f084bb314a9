use bytes::Bytes;
use uuid::Uuid;

use blem_types::AbortReason;

use super::{Completion, Reply};
use crate::operation::{OpContext, OpResponse, Operation};
use crate::transport::TransportResult;

/// Writes one characteristic.
///
/// Completes with whether the write was issued: `Ok(false)` when the
/// characteristic is not in the cache. A write with response completes on
/// the acknowledgement; a write without response completes from `start`.
pub struct WriteDataOp {
    uuid: Uuid,
    data: Bytes,
    with_response: bool,
    reply: Reply<bool>,
}

impl WriteDataOp {
    pub fn new(uuid: Uuid, data: Bytes, with_response: bool, completion: Completion<bool>) -> Self {
        Self {
            uuid,
            data,
            with_response,
            reply: Reply::new(completion),
        }
    }
}

impl Operation for WriteDataOp {
    fn name(&self) -> &'static str {
        "write_data"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        let Some(characteristic) = ctx.characteristic(&self.uuid) else {
            self.reply.send(Ok(false));
            return OpResponse::Complete;
        };

        ctx.transport().write_value(
            ctx.peripheral_id(),
            &characteristic,
            self.data.clone(),
            self.with_response,
        );

        if self.with_response {
            OpResponse::InProgress
        } else {
            self.reply.send(Ok(true));
            OpResponse::Complete
        }
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        self.reply.abort(reason);
    }

    fn on_value_written(
        &mut self,
        _ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<()>,
    ) -> OpResponse {
        if characteristic != self.uuid {
            return OpResponse::InProgress;
        }

        self.reply.send(result.clone().map(|()| true).map_err(Into::into));
        OpResponse::Complete
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use blem_types::{CharProperties, Characteristic, uuids};

    use super::*;
    use crate::error::{Error, Result, TransportError};
    use crate::mock::TransportCall;
    use crate::queue::tests::Harness;

    fn capture() -> (Arc<Mutex<Vec<Result<bool>>>>, Completion<bool>) {
        let slot = Arc::new(Mutex::new(Vec::new()));
        let writer = slot.clone();
        (slot, Box::new(move |r| writer.lock().unwrap().push(r)))
    }

    fn harness() -> Harness {
        let mut harness = Harness::new();
        harness.characteristics.push(Characteristic::new(
            uuids::DEVICE_NAME,
            uuids::GAP_SERVICE,
            CharProperties::READ | CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE,
        ));
        harness
    }

    #[test]
    fn test_write_missing_characteristic() {
        let mut harness = Harness::new();
        let (slot, completion) = capture();
        let mut op = WriteDataOp::new(uuids::DEVICE_NAME, Bytes::from_static(b"x"), true, completion);

        assert_eq!(op.start(&mut harness.ctx()), OpResponse::Complete);
        assert!(matches!(slot.lock().unwrap().as_slice(), [Ok(false)]));
        assert!(harness.transport.calls().is_empty());
    }

    #[test]
    fn test_write_with_response_waits_for_ack() {
        let mut harness = harness();
        let (slot, completion) = capture();
        let mut op = WriteDataOp::new(uuids::DEVICE_NAME, Bytes::from_static(b"lab"), true, completion);

        assert_eq!(op.start(&mut harness.ctx()), OpResponse::InProgress);
        assert_eq!(
            harness.transport.calls(),
            vec![TransportCall::WriteValue {
                id: harness.id.clone(),
                characteristic: uuids::DEVICE_NAME,
                data: Bytes::from_static(b"lab"),
                with_response: true,
            }]
        );

        assert_eq!(
            op.on_value_written(&mut harness.ctx(), uuids::APPEARANCE, &Ok(())),
            OpResponse::InProgress
        );
        assert_eq!(
            op.on_value_written(&mut harness.ctx(), uuids::DEVICE_NAME, &Ok(())),
            OpResponse::Complete
        );
        assert!(matches!(slot.lock().unwrap().as_slice(), [Ok(true)]));
    }

    #[test]
    fn test_write_without_response_completes_from_start() {
        let mut harness = harness();
        let (slot, completion) = capture();
        let mut op = WriteDataOp::new(uuids::DEVICE_NAME, Bytes::from_static(b"lab"), false, completion);

        assert_eq!(op.start(&mut harness.ctx()), OpResponse::Complete);
        assert!(matches!(slot.lock().unwrap().as_slice(), [Ok(true)]));
    }

    #[test]
    fn test_write_error() {
        let mut harness = harness();
        let (slot, completion) = capture();
        let mut op = WriteDataOp::new(uuids::DEVICE_NAME, Bytes::new(), true, completion);
        op.start(&mut harness.ctx());

        op.on_value_written(
            &mut harness.ctx(),
            uuids::DEVICE_NAME,
            &Err(TransportError::new("write not permitted")),
        );

        assert!(matches!(slot.lock().unwrap().as_slice(), [Err(Error::Transport(_))]));
    }

    #[test]
    fn test_write_abort() {
        let (slot, completion) = capture();
        let op = Box::new(WriteDataOp::new(uuids::DEVICE_NAME, Bytes::new(), true, completion));
        op.abort(AbortReason::FailedToConnect);
        assert!(matches!(
            slot.lock().unwrap().as_slice(),
            [Err(Error::ConnectionAborted {
                reason: AbortReason::FailedToConnect
            })]
        ));
    }
}
