//! Per-device operation queue.
//!
//! The head of the queue is the only operation that receives transport
//! events. It leaves the queue when it reports [`OpResponse::Complete`], and
//! the next head is started straight away. Aborting drains the queue head
//! first, so every queued operation sees exactly one `abort`.

use std::collections::VecDeque;

use tracing::debug;

use blem_types::AbortReason;

use crate::operation::{self, OpContext, OpResponse, Operation};
use crate::transport::PeripheralEvent;

pub(crate) struct OperationQueue {
    ops: VecDeque<Box<dyn Operation>>,
}

impl OperationQueue {
    pub(crate) fn new() -> Self {
        Self {
            ops: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append an operation. Returns whether the queue was empty before.
    pub(crate) fn push_back(&mut self, op: Box<dyn Operation>) -> bool {
        let was_empty = self.ops.is_empty();
        self.ops.push_back(op);
        was_empty
    }

    /// Put an operation ahead of everything already queued.
    ///
    /// Only valid while no operation has been started.
    pub(crate) fn push_front(&mut self, op: Box<dyn Operation>) {
        self.ops.push_front(op);
    }

    /// Start the head, popping and moving on for as long as `start` completes.
    pub(crate) fn start_head(&mut self, ctx: &mut OpContext<'_>) {
        while let Some(head) = self.ops.front_mut() {
            debug!(op = head.name(), "Starting operation");
            match head.start(ctx) {
                OpResponse::InProgress => break,
                OpResponse::Complete => {
                    self.ops.pop_front();
                }
            }
        }
    }

    /// Deliver an event to the head only.
    pub(crate) fn dispatch(&mut self, ctx: &mut OpContext<'_>, event: &PeripheralEvent) {
        let Some(head) = self.ops.front_mut() else {
            debug!(event = event.kind(), "No operation queued, event not routed");
            return;
        };

        if operation::dispatch(head.as_mut(), ctx, event) == OpResponse::Complete {
            debug!(op = head.name(), "Operation complete");
            self.ops.pop_front();
            self.start_head(ctx);
        }
    }

    /// Abort every queued operation, head first, and leave the queue empty.
    pub(crate) fn abort_all(&mut self, reason: AbortReason) {
        if !self.ops.is_empty() {
            debug!(count = self.ops.len(), %reason, "Aborting queued operations");
        }
        while let Some(op) = self.ops.pop_front() {
            op.abort(reason);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex, RwLock};

    use proptest::prelude::*;
    use uuid::Uuid;

    use blem_types::{Characteristic, PeripheralId};

    use super::*;
    use crate::device::DeviceInfo;
    use crate::mock::MockTransport;
    use crate::transport::{TransportResult, event_channel};

    /// What happened to each recording op, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Step {
        Started(u32),
        Completed(u32),
        Aborted(u32, AbortReason),
    }

    pub(crate) type Log = Arc<Mutex<Vec<Step>>>;

    /// Completes on its first RSSI callback, or from `start` when `instant`.
    pub(crate) struct RecordingOp {
        pub(crate) id: u32,
        pub(crate) instant: bool,
        pub(crate) log: Log,
    }

    impl Operation for RecordingOp {
        fn start(&mut self, _ctx: &mut OpContext<'_>) -> OpResponse {
            self.log.lock().unwrap().push(Step::Started(self.id));
            if self.instant {
                self.log.lock().unwrap().push(Step::Completed(self.id));
                OpResponse::Complete
            } else {
                OpResponse::InProgress
            }
        }

        fn abort(self: Box<Self>, reason: AbortReason) {
            self.log.lock().unwrap().push(Step::Aborted(self.id, reason));
        }

        fn on_rssi_read(&mut self, _ctx: &mut OpContext<'_>, _result: &TransportResult<i16>) -> OpResponse {
            self.log.lock().unwrap().push(Step::Completed(self.id));
            OpResponse::Complete
        }
    }

    /// Owns everything an `OpContext` borrows.
    pub(crate) struct Harness {
        pub(crate) id: PeripheralId,
        pub(crate) transport: MockTransport,
        pub(crate) characteristics: Vec<Characteristic>,
        pub(crate) auto_discover: Vec<Uuid>,
        pub(crate) info: Arc<RwLock<DeviceInfo>>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let (tx, _rx) = event_channel();
            Self {
                id: PeripheralId::new("queue-test"),
                transport: MockTransport::new(tx),
                characteristics: Vec::new(),
                auto_discover: Vec::new(),
                info: Arc::new(RwLock::new(DeviceInfo::new("Unknown"))),
            }
        }

        pub(crate) fn ctx(&mut self) -> OpContext<'_> {
            OpContext {
                peripheral_id: &self.id,
                transport: &self.transport,
                characteristics: &mut self.characteristics,
                auto_discover: &self.auto_discover,
                info: &self.info,
            }
        }
    }

    fn op(id: u32, instant: bool, log: &Log) -> Box<dyn Operation> {
        Box::new(RecordingOp {
            id,
            instant,
            log: log.clone(),
        })
    }

    fn rssi_event() -> PeripheralEvent {
        PeripheralEvent::RssiRead(Ok(-40))
    }

    #[test]
    fn test_push_back_reports_empty() {
        let log = Log::default();
        let mut queue = OperationQueue::new();
        assert!(queue.push_back(op(1, false, &log)));
        assert!(!queue.push_back(op(2, false, &log)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_start_loops_over_instant_ops() {
        let log = Log::default();
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        queue.push_back(op(1, true, &log));
        queue.push_back(op(2, true, &log));
        queue.push_back(op(3, false, &log));
        queue.push_back(op(4, false, &log));

        queue.start_head(&mut harness.ctx());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Step::Started(1),
                Step::Completed(1),
                Step::Started(2),
                Step::Completed(2),
                Step::Started(3),
            ]
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_only_head_receives_events() {
        let log = Log::default();
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        queue.push_back(op(1, false, &log));
        queue.push_back(op(2, false, &log));
        queue.start_head(&mut harness.ctx());

        queue.dispatch(&mut harness.ctx(), &rssi_event());

        assert_eq!(
            *log.lock().unwrap(),
            vec![Step::Started(1), Step::Completed(1), Step::Started(2)]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_default_handlers_keep_head() {
        let log = Log::default();
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        queue.push_back(op(1, false, &log));
        queue.start_head(&mut harness.ctx());

        let unrelated = PeripheralEvent::NotificationStateUpdated {
            characteristic: Uuid::nil(),
            result: Ok(true),
        };
        queue.dispatch(&mut harness.ctx(), &unrelated);

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dispatch_on_empty_queue_is_noop() {
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        queue.dispatch(&mut harness.ctx(), &rssi_event());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_runs_first() {
        let log = Log::default();
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        queue.push_back(op(1, false, &log));
        queue.push_front(op(0, false, &log));
        queue.start_head(&mut harness.ctx());

        assert_eq!(*log.lock().unwrap(), vec![Step::Started(0)]);
    }

    #[test]
    fn test_abort_all_head_first() {
        let log = Log::default();
        let mut harness = Harness::new();
        let mut queue = OperationQueue::new();
        for id in 1..=3 {
            queue.push_back(op(id, false, &log));
        }
        queue.start_head(&mut harness.ctx());
        queue.abort_all(AbortReason::Disconnected);

        assert!(queue.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Step::Started(1),
                Step::Aborted(1, AbortReason::Disconnected),
                Step::Aborted(2, AbortReason::Disconnected),
                Step::Aborted(3, AbortReason::Disconnected),
            ]
        );
    }

    fn reason_strategy() -> impl Strategy<Value = AbortReason> {
        prop_oneof![
            Just(AbortReason::Disconnected),
            Just(AbortReason::FailedToConnect),
            Just(AbortReason::RadioUnavailable),
        ]
    }

    proptest! {
        #[test]
        fn test_completion_order_is_fifo(instants in proptest::collection::vec(any::<bool>(), 1..20)) {
            let log = Log::default();
            let mut harness = Harness::new();
            let mut queue = OperationQueue::new();
            for (id, instant) in instants.iter().enumerate() {
                queue.push_back(op(id as u32, *instant, &log));
            }

            queue.start_head(&mut harness.ctx());
            while !queue.is_empty() {
                queue.dispatch(&mut harness.ctx(), &rssi_event());
            }

            let steps = log.lock().unwrap().clone();
            let completed: Vec<u32> = steps
                .iter()
                .filter_map(|s| match s {
                    Step::Completed(id) => Some(*id),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(completed, (0..instants.len() as u32).collect::<Vec<_>>());

            // Never two ops started without the first completing.
            let mut active: Option<u32> = None;
            for step in steps {
                match step {
                    Step::Started(id) => {
                        prop_assert!(active.is_none());
                        active = Some(id);
                    }
                    Step::Completed(id) => {
                        prop_assert_eq!(active, Some(id));
                        active = None;
                    }
                    Step::Aborted(..) => prop_assert!(false),
                }
            }
        }

        #[test]
        fn test_abort_reaches_every_queued_op(
            count in 0usize..20,
            completed_first in 0usize..5,
            reason in reason_strategy(),
        ) {
            let log = Log::default();
            let mut harness = Harness::new();
            let mut queue = OperationQueue::new();
            for id in 0..count {
                queue.push_back(op(id as u32, false, &log));
            }
            queue.start_head(&mut harness.ctx());
            let completed = completed_first.min(count);
            for _ in 0..completed {
                queue.dispatch(&mut harness.ctx(), &rssi_event());
            }

            queue.abort_all(reason);

            prop_assert!(queue.is_empty());
            let aborted: Vec<u32> = log
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Step::Aborted(id, r) if *r == reason => Some(*id),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(aborted, (completed as u32..count as u32).collect::<Vec<_>>());
        }
    }
}
