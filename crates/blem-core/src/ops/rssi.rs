use blem_types::AbortReason;

use super::{Completion, Reply};
use crate::operation::{OpContext, OpResponse, Operation};
use crate::transport::TransportResult;

/// Reads the link's signal strength and records it on the device.
pub struct ReadRssiOp {
    reply: Reply<i16>,
}

impl ReadRssiOp {
    pub fn new(completion: Completion<i16>) -> Self {
        Self {
            reply: Reply::new(completion),
        }
    }
}

impl Operation for ReadRssiOp {
    fn name(&self) -> &'static str {
        "read_rssi"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        ctx.transport().read_rssi(ctx.peripheral_id());
        OpResponse::InProgress
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        self.reply.abort(reason);
    }

    fn on_rssi_read(&mut self, ctx: &mut OpContext<'_>, result: &TransportResult<i16>) -> OpResponse {
        match result {
            Ok(rssi) => {
                ctx.set_rssi(*rssi);
                self.reply.send(Ok(*rssi));
            }
            Err(e) => self.reply.send(Err(e.clone().into())),
        }
        OpResponse::Complete
    }
}
