use bytes::Bytes;
use uuid::Uuid;

use blem_types::{AbortReason, Characteristic};

use super::{Completion, Reply};
use crate::operation::{OpContext, OpResponse, Operation};
use crate::transport::TransportResult;

/// Reads one characteristic.
///
/// Completes with `Ok(None)` without touching the transport when the
/// characteristic is not in the device's cache.
pub struct ReadDataOp {
    uuid: Uuid,
    reply: Reply<Option<Bytes>>,
}

impl ReadDataOp {
    pub fn new(uuid: Uuid, completion: Completion<Option<Bytes>>) -> Self {
        Self {
            uuid,
            reply: Reply::new(completion),
        }
    }
}

impl Operation for ReadDataOp {
    fn name(&self) -> &'static str {
        "read_data"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        match ctx.characteristic(&self.uuid) {
            Some(characteristic) => {
                ctx.transport().read_value(ctx.peripheral_id(), &characteristic);
                OpResponse::InProgress
            }
            None => {
                self.reply.send(Ok(None));
                OpResponse::Complete
            }
        }
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        self.reply.abort(reason);
    }

    fn on_value_updated(
        &mut self,
        _ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<Bytes>,
    ) -> OpResponse {
        if characteristic != self.uuid {
            return OpResponse::InProgress;
        }

        let result = match result {
            Ok(value) => Ok(Some(value.clone())),
            Err(e) => Err(e.clone().into()),
        };
        self.reply.send(result);
        OpResponse::Complete
    }
}

/// Reads one characteristic as text.
///
/// Invalid UTF-8 is replaced and leading/trailing control characters
/// (commonly NUL padding) are trimmed.
pub struct ReadStringOp {
    inner: ReadDataOp,
}

impl ReadStringOp {
    pub fn new(uuid: Uuid, completion: Completion<Option<String>>) -> Self {
        let decode: Completion<Option<Bytes>> =
            Box::new(move |result| completion(result.map(|value| value.map(|v| decode_string(&v)))));
        Self {
            inner: ReadDataOp::new(uuid, decode),
        }
    }
}

pub(crate) fn decode_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|c: char| c.is_control())
        .to_string()
}

impl Operation for ReadStringOp {
    fn name(&self) -> &'static str {
        "read_string"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        self.inner.start(ctx)
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        Box::new(self.inner).abort(reason);
    }

    fn on_value_updated(
        &mut self,
        ctx: &mut OpContext<'_>,
        characteristic: Uuid,
        result: &TransportResult<Bytes>,
    ) -> OpResponse {
        self.inner.on_value_updated(ctx, characteristic, result)
    }
}

/// Completes from `start` with the characteristic cache.
///
/// Queued behind the auto-discovery operation, it observes the cache once
/// discovery for the current connection has finished.
pub struct SnapshotOp {
    reply: Reply<Vec<Characteristic>>,
}

impl SnapshotOp {
    pub fn new(completion: Completion<Vec<Characteristic>>) -> Self {
        Self {
            reply: Reply::new(completion),
        }
    }
}

impl Operation for SnapshotOp {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn start(&mut self, ctx: &mut OpContext<'_>) -> OpResponse {
        self.reply.send(Ok(ctx.characteristics().to_vec()));
        OpResponse::Complete
    }

    fn abort(self: Box<Self>, reason: AbortReason) {
        self.reply.abort(reason);
    }
}
