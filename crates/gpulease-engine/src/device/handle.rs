use std::error::Error as _;
use std::fmt;
use std::sync::Arc;

use crate::logging::{Diagnostic, DiagnosticSink, LogSink, Operation};

use super::{BindError, Binding, ConsumerId, DataPolicy, DeviceHooks, HandleConfig, ResourceDirectory};

/// One consumer's lease on a device and its execution queue.
///
/// The handle holds at most one binding at a time and hands both halves back
/// to the directory exactly once: when it migrates to another device, or when
/// it is dropped. Owners embed a handle next to their GPU-resident state and
/// route every device change through [`set_device`](Self::set_device) or
/// [`replicate_from`](Self::replicate_from), passing that state as the
/// [`DeviceHooks`] to tear down and rebuild.
///
/// Failures never panic. Each one is written to the diagnostic sink and
/// returned as a [`BindError`]; afterwards the handle is either unchanged or
/// fully unbound (`device() == None`).
///
/// A handle is driven from one thread at a time. Independent handles may be
/// driven concurrently as long as the directory is shared safely, which the
/// [`ResourceDirectory`] bound requires.
pub struct GpuHandle<D: ResourceDirectory> {
    directory: Arc<D>,
    consumer: ConsumerId,
    binding: Option<Binding<D::Queue>>,
    sink: Arc<dyn DiagnosticSink>,
    label: Option<String>,
}

impl<D: ResourceDirectory> GpuHandle<D> {
    /// Creates a handle and binds it to `preferred`.
    ///
    /// Binding is best effort: on failure the handle is returned unbound and a
    /// diagnostic is emitted. No hooks run here; owners perform their own
    /// initial setup.
    pub fn new(directory: Arc<D>, preferred: u32) -> Self {
        Self::with_config(directory, HandleConfig::on_device(preferred))
    }

    pub fn with_config(directory: Arc<D>, config: HandleConfig) -> Self {
        Self::with_sink(directory, config, Arc::new(LogSink))
    }

    /// Like [`with_config`](Self::with_config), reporting to `sink`.
    pub fn with_sink(directory: Arc<D>, config: HandleConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let mut handle = Self {
            directory,
            consumer: ConsumerId::next(),
            binding: None,
            sink,
            label: config.label,
        };

        if let Err(err) = handle.bind(config.preferred_device) {
            handle.report(Operation::Construct, &err);
        }

        handle
    }

    /// Bound device index, or `None` when unbound.
    #[inline]
    pub fn device(&self) -> Option<u32> {
        self.binding.as_ref().map(|b| b.device)
    }

    /// Bound queue, or `None` when unbound.
    #[inline]
    pub fn queue(&self) -> Option<&D::Queue> {
        self.binding.as_ref().map(|b| &b.queue)
    }

    #[inline]
    pub fn binding(&self) -> Option<&Binding<D::Queue>> {
        self.binding.as_ref()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    #[inline]
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Moves the handle to `target`.
    ///
    /// - already on `target`: nothing happens, not even a directory call
    /// - `target` out of range: diagnostic, binding unchanged
    /// - unbound: bind, then `hooks.reinitialize`
    /// - bound elsewhere: `hooks.deinitialize` on the old binding, release it,
    ///   bind `target`, then `hooks.reinitialize`
    ///
    /// If acquiring `target` fails after the old binding was released, the
    /// handle stays unbound and `reinitialize` is not called.
    pub fn set_device<H>(&mut self, target: u32, policy: DataPolicy, hooks: &mut H) -> Result<(), BindError>
    where
        H: DeviceHooks<D::Queue> + ?Sized,
    {
        self.migrate(Operation::SetDevice, target, policy, hooks)
    }

    /// Marks the bound queue as the active submission target.
    pub fn reserve_gpu(&self) -> Result<(), BindError> {
        let result = match &self.binding {
            None => Err(BindError::NotBound),
            Some(b) => self
                .directory
                .reserve_queue(&b.queue)
                .map_err(BindError::ReserveFailed),
        };
        self.reported(Operation::ReserveGpu, result)
    }

    /// Blocks until all work submitted on the bound queue has completed.
    pub fn synchronize_queue(&self) -> Result<(), BindError> {
        let result = match &self.binding {
            None => Err(BindError::NotBound),
            Some(b) => self
                .directory
                .synchronize_queue(&b.queue)
                .map_err(BindError::SynchronizeFailed),
        };
        self.reported(Operation::SynchronizeQueue, result)
    }

    /// Binds to `other`'s device and shares its queue.
    ///
    /// Migrates as [`set_device`](Self::set_device) would, then, if the two
    /// handles still hold different queues, drains this handle's queue, has
    /// the directory record this handle as a holder of `other`'s queue, and
    /// gives the private queue back. The handle holds exactly one queue at
    /// every step; if sharing fails it keeps its private queue.
    pub fn replicate_from<H>(&mut self, other: &GpuHandle<D>, policy: DataPolicy, hooks: &mut H) -> Result<(), BindError>
    where
        H: DeviceHooks<D::Queue> + ?Sized,
    {
        let op = Operation::ReplicateObject;

        let Some(source) = other.binding.clone() else {
            return self.reported(op, Err(BindError::NotBound));
        };
        if !Arc::ptr_eq(&self.directory, &other.directory) {
            return self.reported(op, Err(BindError::ForeignDirectory));
        }

        self.migrate(op, source.device, policy, hooks)?;

        let Some(own) = self.binding.as_ref() else {
            return self.reported(op, Err(BindError::NotBound));
        };
        if own.queue == source.queue {
            return Ok(());
        }

        if let Err(err) = self.directory.synchronize_queue(&own.queue) {
            return self.reported(op, Err(BindError::SynchronizeFailed(err)));
        }
        if let Err(err) = self.directory.adopt_queue(self.consumer, &source.queue, source.device) {
            return self.reported(
                op,
                Err(BindError::QueueUnavailable {
                    device: source.device,
                    source: err,
                }),
            );
        }

        self.directory.release_queue(self.consumer, &own.queue, own.device);
        log::debug!("{} now shares queue of {} on device {}", self.tag(), other.tag(), source.device);
        self.binding = Some(source);
        Ok(())
    }

    fn migrate<H>(&mut self, op: Operation, target: u32, policy: DataPolicy, hooks: &mut H) -> Result<(), BindError>
    where
        H: DeviceHooks<D::Queue> + ?Sized,
    {
        if self.device() == Some(target) {
            return Ok(());
        }

        let count = self.directory.device_count();
        if target >= count {
            return self.reported(op, Err(BindError::InvalidDeviceIndex { device: target, count }));
        }

        if let Some(old) = &self.binding {
            hooks.deinitialize(old, policy);
            log::debug!("{} leaving device {} for {target}", self.tag(), old.device);
        }
        self.unbind();

        if let Err(err) = self.bind(target) {
            return self.reported(op, Err(err));
        }
        if let Some(new) = &self.binding {
            hooks.reinitialize(new, policy);
        }
        Ok(())
    }

    /// Acquires `device` and a queue on it. Expects the handle to be unbound
    /// and leaves it unbound on failure.
    fn bind(&mut self, device: u32) -> Result<(), BindError> {
        debug_assert!(self.binding.is_none());

        self.directory
            .acquire_device(self.consumer, device)
            .map_err(|source| BindError::DeviceUnavailable { device, source })?;

        let queue = match self.directory.acquire_queue(self.consumer, device) {
            Ok(queue) => queue,
            Err(source) => {
                self.directory.release_device(self.consumer, device);
                return Err(BindError::QueueUnavailable { device, source });
            }
        };

        log::debug!("{} bound to device {device} ({queue:?})", self.tag());
        self.binding = Some(Binding { device, queue });
        Ok(())
    }

    /// Returns queue and device to the directory, queue first.
    fn unbind(&mut self) {
        if let Some(Binding { device, queue }) = self.binding.take() {
            self.directory.release_queue(self.consumer, &queue, device);
            self.directory.release_device(self.consumer, device);
            log::trace!("{} released device {device}", self.tag());
        }
    }

    /// Consumer id plus label, for traces.
    fn tag(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({label})", self.consumer),
            None => self.consumer.to_string(),
        }
    }

    fn reported(&self, op: Operation, result: Result<(), BindError>) -> Result<(), BindError> {
        if let Err(err) = &result {
            self.report(op, err);
        }
        result
    }

    fn report(&self, operation: Operation, err: &BindError) {
        let mut message = err.to_string();
        if let Some(source) = err.source() {
            message.push_str(": ");
            message.push_str(&source.to_string());
        }
        self.sink.emit(&Diagnostic {
            consumer: self.consumer,
            label: self.label.clone(),
            operation,
            message,
        });
    }
}

impl<D: ResourceDirectory> Drop for GpuHandle<D> {
    fn drop(&mut self) {
        let Some(binding) = &self.binding else {
            return;
        };

        // Drain pending work before the queue can disappear; release regardless.
        if let Err(err) = self.directory.synchronize_queue(&binding.queue) {
            self.report(Operation::Destruct, &BindError::SynchronizeFailed(err));
        }
        self.unbind();
    }
}

impl<D: ResourceDirectory> fmt::Debug for GpuHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuHandle")
            .field("consumer", &self.consumer)
            .field("label", &self.label)
            .field("binding", &self.binding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DirectoryCall, MemoryDirectory, NoHooks, QueueHandle};
    use crate::logging::RecordingSink;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Hook {
        Deinit,
        Reinit,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct HookEvent {
        hook: Hook,
        device: u32,
        queue: QueueHandle,
        policy: DataPolicy,
        /// Directory calls logged before the hook ran.
        calls_before: usize,
    }

    struct HookLog {
        dir: Arc<MemoryDirectory>,
        events: Vec<HookEvent>,
    }

    impl HookLog {
        fn new(dir: &Arc<MemoryDirectory>) -> Self {
            Self { dir: Arc::clone(dir), events: Vec::new() }
        }

        fn count(&self, hook: Hook) -> usize {
            self.events.iter().filter(|e| e.hook == hook).count()
        }

        fn push(&mut self, hook: Hook, binding: &Binding<QueueHandle>, policy: DataPolicy) {
            let calls_before = self.dir.calls().len();
            self.events.push(HookEvent {
                hook,
                device: binding.device,
                queue: binding.queue,
                policy,
                calls_before,
            });
        }
    }

    impl DeviceHooks<QueueHandle> for HookLog {
        fn reinitialize(&mut self, binding: &Binding<QueueHandle>, policy: DataPolicy) {
            self.push(Hook::Reinit, binding, policy);
        }

        fn deinitialize(&mut self, binding: &Binding<QueueHandle>, policy: DataPolicy) {
            self.push(Hook::Deinit, binding, policy);
        }
    }

    fn setup(devices: u32) -> (Arc<MemoryDirectory>, Arc<RecordingSink>) {
        (Arc::new(MemoryDirectory::new(devices)), Arc::new(RecordingSink::new()))
    }

    fn handle(dir: &Arc<MemoryDirectory>, sink: &Arc<RecordingSink>, device: u32) -> GpuHandle<MemoryDirectory> {
        GpuHandle::with_sink(Arc::clone(dir), HandleConfig::on_device(device), sink.clone())
    }

    fn assert_invariant(h: &GpuHandle<MemoryDirectory>) {
        assert_eq!(h.device().is_some(), h.queue().is_some());
    }

    fn count_calls(dir: &MemoryDirectory, pred: impl Fn(&DirectoryCall) -> bool) -> usize {
        dir.calls().iter().filter(|c| pred(c)).count()
    }

    // ── construction ──────────────────────────────────────────────────────

    #[test]
    fn construct_binds_preferred_device() {
        let (dir, sink) = setup(2);
        let h = handle(&dir, &sink, 1);

        assert_eq!(h.device(), Some(1));
        let q = *h.queue().unwrap();
        assert_eq!(dir.queue_device(q), Some(1));
        assert_eq!(dir.queue_holders(q), 1);
        assert_eq!(dir.device_consumers(1), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn default_config_binds_device_zero() {
        let dir = Arc::new(MemoryDirectory::new(1));
        let h = GpuHandle::with_config(Arc::clone(&dir), HandleConfig::default().label("default"));
        assert_eq!(h.device(), Some(0));
        assert_eq!(h.label(), Some("default"));
    }

    #[test]
    fn construct_device_failure_leaves_unbound() {
        let (dir, sink) = setup(2);
        dir.fail_device(0, true);

        let h = handle(&dir, &sink, 0);

        assert_eq!(h.device(), None);
        assert_invariant(&h);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].operation, Operation::Construct);
        assert_eq!(
            count_calls(&dir, |c| matches!(c, DirectoryCall::AcquireQueue { .. })),
            0
        );
    }

    #[test]
    fn construct_queue_failure_returns_device() {
        let (dir, sink) = setup(2);
        dir.fail_queue(0, true);

        let h = handle(&dir, &sink, 0);
        let c = h.consumer();

        assert_eq!(h.device(), None);
        assert_eq!(sink.len(), 1);
        assert_eq!(dir.device_consumers(0), 0);
        assert_eq!(
            dir.calls(),
            vec![
                DirectoryCall::AcquireDevice { consumer: c, device: 0 },
                DirectoryCall::AcquireQueue { consumer: c, device: 0 },
                DirectoryCall::ReleaseDevice { consumer: c, device: 0 },
            ]
        );
    }

    #[test]
    fn construct_out_of_range_leaves_unbound() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 3);
        assert_eq!(h.device(), None);
        assert_eq!(sink.len(), 1);
    }

    // ── set_device ────────────────────────────────────────────────────────

    #[test]
    fn set_device_to_current_is_noop() {
        let (dir, sink) = setup(2);
        let mut h = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        let before = *h.queue().unwrap();
        dir.clear_calls();

        h.set_device(0, DataPolicy::PreserveData, &mut hooks).unwrap();

        assert!(dir.calls().is_empty());
        assert!(hooks.events.is_empty());
        assert_eq!(h.queue(), Some(&before));
    }

    #[test]
    fn set_device_out_of_range_keeps_binding() {
        let (dir, sink) = setup(4);
        let mut h = handle(&dir, &sink, 1);
        let mut hooks = HookLog::new(&dir);
        dir.clear_calls();

        let err = h.set_device(5, DataPolicy::Discard, &mut hooks).unwrap_err();

        assert_eq!(err, BindError::InvalidDeviceIndex { device: 5, count: 4 });
        assert_eq!(h.device(), Some(1));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].operation, Operation::SetDevice);
        assert!(hooks.events.is_empty());
        assert!(dir.calls().is_empty());
    }

    #[test]
    fn set_device_from_unbound_reinitializes_once() {
        let (dir, sink) = setup(2);
        dir.fail_device(0, true);
        let mut h = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);

        h.set_device(1, DataPolicy::PreserveData, &mut hooks).unwrap();

        assert_eq!(h.device(), Some(1));
        assert!(h.queue().is_some());
        assert_eq!(hooks.count(Hook::Reinit), 1);
        assert_eq!(hooks.count(Hook::Deinit), 0);
        assert_eq!(hooks.events[0].policy, DataPolicy::PreserveData);
    }

    #[test]
    fn migration_runs_in_order() {
        let (dir, sink) = setup(2);
        let mut h = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        let c = h.consumer();
        let old_queue = *h.queue().unwrap();
        dir.clear_calls();

        h.set_device(1, DataPolicy::Discard, &mut hooks).unwrap();
        let new_queue = *h.queue().unwrap();

        assert_eq!(
            dir.calls(),
            vec![
                DirectoryCall::ReleaseQueue { consumer: c, queue: old_queue, device: 0 },
                DirectoryCall::ReleaseDevice { consumer: c, device: 0 },
                DirectoryCall::AcquireDevice { consumer: c, device: 1 },
                DirectoryCall::AcquireQueue { consumer: c, device: 1 },
            ]
        );
        assert_eq!(
            hooks.events,
            vec![
                HookEvent {
                    hook: Hook::Deinit,
                    device: 0,
                    queue: old_queue,
                    policy: DataPolicy::Discard,
                    calls_before: 0,
                },
                HookEvent {
                    hook: Hook::Reinit,
                    device: 1,
                    queue: new_queue,
                    policy: DataPolicy::Discard,
                    calls_before: 4,
                },
            ]
        );
        assert_eq!(dir.live_queues(), 1);
        assert_eq!(dir.device_consumers(0), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn migration_device_failure_leaves_unbound() {
        let (dir, sink) = setup(2);
        let mut h = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        dir.fail_device(1, true);

        let err = h.set_device(1, DataPolicy::PreserveData, &mut hooks).unwrap_err();

        assert!(matches!(err, BindError::DeviceUnavailable { device: 1, .. }));
        assert_eq!(h.device(), None);
        assert_invariant(&h);
        assert_eq!(hooks.count(Hook::Deinit), 1);
        assert_eq!(hooks.count(Hook::Reinit), 0);
        assert_eq!(dir.device_consumers(0), 0);
        assert_eq!(dir.live_queues(), 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn migration_queue_failure_leaves_unbound() {
        let (dir, sink) = setup(2);
        let mut h = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        dir.fail_queue(1, true);

        let err = h.set_device(1, DataPolicy::Discard, &mut hooks).unwrap_err();

        assert!(matches!(err, BindError::QueueUnavailable { device: 1, .. }));
        assert_eq!(h.device(), None);
        assert_eq!(dir.device_consumers(1), 0);
        assert_eq!(hooks.count(Hook::Reinit), 0);
    }

    // ── reserve / synchronize ─────────────────────────────────────────────

    #[test]
    fn reserve_marks_bound_queue() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);

        h.reserve_gpu().unwrap();

        assert_eq!(dir.reserved_queue(0), h.queue().copied());
        assert!(sink.is_empty());
    }

    #[test]
    fn reserve_requires_binding() {
        let (dir, sink) = setup(1);
        dir.fail_device(0, true);
        let h = handle(&dir, &sink, 0);
        sink.clear();

        assert_eq!(h.reserve_gpu(), Err(BindError::NotBound));
        assert_eq!(sink.records()[0].operation, Operation::ReserveGpu);
    }

    #[test]
    fn reserve_failure_keeps_binding() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);
        dir.fail_reserve(true);

        assert!(matches!(h.reserve_gpu(), Err(BindError::ReserveFailed(_))));
        assert_eq!(h.device(), Some(0));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn synchronize_drains_queue() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);
        let q = *h.queue().unwrap();
        dir.submit(q).unwrap();
        dir.submit(q).unwrap();

        h.synchronize_queue().unwrap();

        assert_eq!(dir.pending_work(q), Some(0));
        assert_eq!(dir.completed_work(q), Some(2));
        assert_eq!(h.device(), Some(0));
        assert_eq!(h.queue(), Some(&q));
        assert!(sink.is_empty());
    }

    #[test]
    fn synchronize_failures_are_reported() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);
        dir.fail_synchronize(true);

        assert!(matches!(h.synchronize_queue(), Err(BindError::SynchronizeFailed(_))));
        assert_eq!(h.device(), Some(0));
        assert_eq!(sink.records()[0].operation, Operation::SynchronizeQueue);
    }

    #[test]
    fn synchronize_requires_binding() {
        let (dir, sink) = setup(1);
        dir.fail_device(0, true);
        let h = handle(&dir, &sink, 0);
        dir.clear_calls();

        assert_eq!(h.synchronize_queue(), Err(BindError::NotBound));
        assert!(dir.calls().is_empty());
    }

    // ── destruction ───────────────────────────────────────────────────────

    #[test]
    fn drop_synchronizes_then_releases() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);
        let c = h.consumer();
        let q = *h.queue().unwrap();
        dir.clear_calls();

        drop(h);

        assert_eq!(
            dir.calls(),
            vec![
                DirectoryCall::SynchronizeQueue { queue: q },
                DirectoryCall::ReleaseQueue { consumer: c, queue: q, device: 0 },
                DirectoryCall::ReleaseDevice { consumer: c, device: 0 },
            ]
        );
        assert_eq!(dir.live_queues(), 0);
        assert_eq!(dir.device_consumers(0), 0);
    }

    #[test]
    fn drop_releases_even_if_synchronize_fails() {
        let (dir, sink) = setup(1);
        let h = handle(&dir, &sink, 0);
        dir.fail_synchronize(true);

        drop(h);

        assert_eq!(dir.device_consumers(0), 0);
        assert_eq!(sink.records()[0].operation, Operation::Destruct);
    }

    #[test]
    fn drop_unbound_touches_nothing() {
        let (dir, sink) = setup(1);
        dir.fail_device(0, true);
        let h = handle(&dir, &sink, 0);
        dir.clear_calls();

        drop(h);

        assert!(dir.calls().is_empty());
    }

    // ── replication ───────────────────────────────────────────────────────

    #[test]
    fn replicate_adopts_other_device_and_queue() {
        let (dir, sink) = setup(3);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&dir, &sink, 2);
        let mut hooks = HookLog::new(&dir);
        let ca = a.consumer();
        let old_a = *a.queue().unwrap();
        let bq = *b.queue().unwrap();
        dir.clear_calls();

        a.replicate_from(&b, DataPolicy::Discard, &mut hooks).unwrap();

        assert_eq!(a.device(), Some(2));
        assert_eq!(a.queue(), b.queue());
        assert_eq!(dir.queue_holders(bq), 2);
        assert_eq!(dir.queue_holders(old_a), 0);
        assert_eq!(dir.live_queues(), 1);
        assert_eq!(
            count_calls(&dir, |c| *c == DirectoryCall::ReleaseDevice { consumer: ca, device: 0 }),
            1
        );
        assert_eq!(
            count_calls(&dir, |c| matches!(c, DirectoryCall::ReleaseQueue { consumer, .. } if *consumer == ca)),
            2
        );
        assert_eq!(hooks.count(Hook::Deinit), 1);
        assert_eq!(hooks.count(Hook::Reinit), 1);
        assert!(sink.is_empty());

        drop(a);
        assert_eq!(dir.queue_holders(bq), 1);
        drop(b);
        assert_eq!(dir.live_queues(), 0);
        assert_eq!(dir.device_consumers(2), 0);
    }

    #[test]
    fn replicate_on_same_device_swaps_queue_only() {
        let (dir, sink) = setup(1);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        let ca = a.consumer();
        let aq = *a.queue().unwrap();
        let bq = *b.queue().unwrap();
        assert_ne!(aq, bq);
        dir.clear_calls();

        a.replicate_from(&b, DataPolicy::PreserveData, &mut hooks).unwrap();

        assert!(hooks.events.is_empty());
        assert_eq!(
            dir.calls(),
            vec![
                DirectoryCall::SynchronizeQueue { queue: aq },
                DirectoryCall::AdoptQueue { consumer: ca, queue: bq, device: 0 },
                DirectoryCall::ReleaseQueue { consumer: ca, queue: aq, device: 0 },
            ]
        );
        assert_eq!(a.queue(), Some(&bq));
    }

    #[test]
    fn replicate_when_already_sharing_is_noop() {
        let (dir, sink) = setup(1);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        a.replicate_from(&b, DataPolicy::Discard, &mut hooks).unwrap();
        dir.clear_calls();

        a.replicate_from(&b, DataPolicy::Discard, &mut hooks).unwrap();

        assert!(dir.calls().is_empty());
    }

    #[test]
    fn replicate_from_unbound_source_is_refused() {
        let (dir, sink) = setup(2);
        let mut a = handle(&dir, &sink, 0);
        dir.fail_device(1, true);
        let b = handle(&dir, &sink, 1);
        let mut hooks = HookLog::new(&dir);
        sink.clear();

        assert_eq!(a.replicate_from(&b, DataPolicy::Discard, &mut hooks), Err(BindError::NotBound));
        assert_eq!(a.device(), Some(0));
        assert_eq!(sink.records()[0].operation, Operation::ReplicateObject);
    }

    #[test]
    fn replicate_across_directories_is_refused() {
        let (dir, sink) = setup(1);
        let (other_dir, _) = setup(1);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&other_dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);

        assert_eq!(
            a.replicate_from(&b, DataPolicy::Discard, &mut hooks),
            Err(BindError::ForeignDirectory)
        );
        assert_ne!(a.queue(), None);
        assert_eq!(dir.live_queues(), 1);
    }

    #[test]
    fn replicate_keeps_private_queue_when_drain_fails() {
        let (dir, sink) = setup(1);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        let aq = *a.queue().unwrap();
        let bq = *b.queue().unwrap();
        dir.fail_synchronize(true);

        let err = a.replicate_from(&b, DataPolicy::Discard, &mut hooks).unwrap_err();

        assert!(matches!(err, BindError::SynchronizeFailed(_)));
        assert_eq!(a.queue(), Some(&aq));
        assert_eq!(dir.queue_holders(bq), 1);
        assert_invariant(&a);
        dir.fail_synchronize(false);
    }

    #[test]
    fn replicate_keeps_private_queue_when_adopt_fails() {
        let (dir, sink) = setup(1);
        let mut a = handle(&dir, &sink, 0);
        let b = handle(&dir, &sink, 0);
        let mut hooks = HookLog::new(&dir);
        let ca = a.consumer();
        let aq = *a.queue().unwrap();
        let bq = *b.queue().unwrap();
        dir.fail_adopt(true);
        dir.clear_calls();

        let err = a.replicate_from(&b, DataPolicy::Discard, &mut hooks).unwrap_err();

        assert!(matches!(err, BindError::QueueUnavailable { device: 0, .. }));
        assert_eq!(a.queue(), Some(&aq));
        assert_eq!(dir.queue_holders(aq), 1);
        assert_eq!(dir.queue_holders(bq), 1);
        assert_eq!(
            dir.calls(),
            vec![
                DirectoryCall::SynchronizeQueue { queue: aq },
                DirectoryCall::AdoptQueue { consumer: ca, queue: bq, device: 0 },
            ]
        );
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::ReplicateObject);
        assert_invariant(&a);
        dir.fail_adopt(false);
    }

    // ── diagnostics ───────────────────────────────────────────────────────

    #[test]
    fn default_log_sink_reports_without_changing_outcome() {
        let dir = Arc::new(MemoryDirectory::new(2));
        dir.fail_device(0, true);

        let mut h = GpuHandle::new(Arc::clone(&dir), 0);
        assert_eq!(h.device(), None);

        dir.fail_device(0, false);
        h.set_device(1, DataPolicy::Discard, &mut NoHooks).unwrap();
        assert_eq!(h.device(), Some(1));
    }

    #[test]
    fn disabled_sink_does_not_change_outcome() {
        let (dir, sink) = setup(2);
        sink.set_enabled(false);
        let mut h = handle(&dir, &sink, 0);

        assert!(h.set_device(9, DataPolicy::Discard, &mut NoHooks).is_err());
        assert_eq!(h.device(), Some(0));
        assert!(sink.is_empty());
    }

    #[test]
    fn diagnostic_names_the_handle() {
        let (dir, sink) = setup(1);
        dir.fail_device(0, true);
        let h = handle(&dir, &sink, 0);

        let record = &sink.records()[0];
        assert_eq!(record.consumer, h.consumer());
        assert_eq!(record.label, None);
        assert!(record.message.contains("device 0 cannot be retrieved"));
        assert!(record.message.contains("acquisition disabled"));
    }

    #[test]
    fn diagnostic_carries_label() {
        let (dir, sink) = setup(1);
        let mut h = GpuHandle::with_sink(
            Arc::clone(&dir),
            HandleConfig::on_device(0).label("volume"),
            sink.clone(),
        );
        assert_eq!(h.label(), Some("volume"));
        assert!(format!("{h:?}").contains("volume"));

        assert!(h.set_device(4, DataPolicy::Discard, &mut NoHooks).is_err());

        let record = &sink.records()[0];
        assert_eq!(record.label.as_deref(), Some("volume"));
        assert!(record.to_string().contains("\"volume\""));
    }

}
