//! The helper thread that runs plugin-scheduled work outside the process
//! cycle.
//!
//! The plugin calls the schedule feature from inside `run()`. The request
//! is framed into a lock-free ring and the worker thread is woken; it
//! calls the plugin's `work` with a respond callback that frames the reply
//! into a second ring. The process cycle drains that ring at the end of
//! every cycle and hands each reply to `work_response`, then calls
//! `end_run` when the plugin has one.
//!
//! Plugins that restore state synchronously are instead serviced inline:
//! `work` runs directly on the calling thread and only the response ring
//! is used.

use crossbeam::sync::{Parker, Unparker};
use log::{error, warn};
use std::cell::UnsafeCell;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::lv2::{
    LV2Handle, LV2WorkerInterface, LV2WorkerRespondHandle, LV2WorkerStatus, LV2_WORKER_ERR_NO_SPACE,
    LV2_WORKER_SUCCESS,
};
use crate::ring::{blob_channel, BlobReceiver, BlobSender};

/// Replies larger than this are dropped by the realtime drain rather than
/// allocating mid-cycle.
const RESPONSE_SCRATCH_SIZE: usize = 4096;

/// The plugin's worker entry points plus its instance handle.
///
/// The raw pointers come from the plugin's extension data and stay valid
/// for the instance lifetime; the worker thread is joined before the
/// instance is freed.
#[derive(Clone, Copy)]
pub struct WorkerIface {
    pub handle: LV2Handle,
    pub iface: *const LV2WorkerInterface,
}

// The LV2 worker contract is exactly this: `work` may be called from a
// non-realtime thread while `run` executes on the realtime thread.
unsafe impl Send for WorkerIface {}

/// Data behind the schedule feature pointer. Heap pinned for the plugin's
/// lifetime.
///
/// Field access happens from the main thread before the audio server is
/// activated and from the realtime thread afterwards, never concurrently,
/// which is what makes the `UnsafeCell` accesses sound.
struct ScheduleHandle {
    synchronous: AtomicBool,
    iface: UnsafeCell<Option<WorkerIface>>,
    requests: UnsafeCell<BlobSender>,
    /// Present only in synchronous mode, where replies are framed from the
    /// scheduling thread itself.
    responses: UnsafeCell<Option<BlobSender>>,
    unparker: Unparker,
}

unsafe impl Send for ScheduleHandle {}
unsafe impl Sync for ScheduleHandle {}

/// The schedule feature callback handed to the plugin.
pub unsafe extern "C" fn schedule_work(
    handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> LV2WorkerStatus {
    if handle.is_null() || (data.is_null() && size > 0) {
        return LV2_WORKER_ERR_NO_SPACE;
    }
    let schedule = &*(handle as *const ScheduleHandle);
    let body = if size == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data as *const u8, size as usize)
    };

    if schedule.synchronous.load(Ordering::Relaxed) {
        let iface = match *schedule.iface.get() {
            Some(iface) => iface,
            None => return LV2_WORKER_ERR_NO_SPACE,
        };
        let responses = match &mut *schedule.responses.get() {
            Some(responses) => responses,
            None => return LV2_WORKER_ERR_NO_SPACE,
        };
        return ((*iface.iface).work)(
            iface.handle,
            respond,
            responses as *mut BlobSender as LV2WorkerRespondHandle,
            size,
            data,
        );
    }

    let requests = &mut *schedule.requests.get();
    if requests.send(body) {
        schedule.unparker.unpark();
        LV2_WORKER_SUCCESS
    } else {
        error!("worker request ring overflow, dropping scheduled work");
        LV2_WORKER_ERR_NO_SPACE
    }
}

/// Respond callback passed to the plugin's `work`. The handle is the ring
/// producer for replies.
unsafe extern "C" fn respond(
    handle: LV2WorkerRespondHandle,
    size: u32,
    data: *const c_void,
) -> LV2WorkerStatus {
    if handle.is_null() || (data.is_null() && size > 0) {
        return LV2_WORKER_ERR_NO_SPACE;
    }
    let responses = &mut *(handle as *mut BlobSender);
    let body = if size == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data as *const u8, size as usize)
    };
    if responses.send(body) {
        LV2_WORKER_SUCCESS
    } else {
        error!("worker response ring overflow, dropping reply");
        LV2_WORKER_ERR_NO_SPACE
    }
}

/// Controller-side worker state: the pinned schedule handle, the helper
/// thread and its shutdown plumbing.
pub struct Worker {
    schedule: Box<ScheduleHandle>,
    requests_rx: Option<BlobReceiver>,
    responses_tx: Option<BlobSender>,
    responses_rx: Option<BlobReceiver>,
    parker: Option<Parker>,
    exit: Arc<AtomicBool>,
    unparker: Unparker,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(ring_capacity: usize) -> Self {
        let (requests_tx, requests_rx) = blob_channel(ring_capacity);
        let (responses_tx, responses_rx) = blob_channel(ring_capacity);
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        Worker {
            schedule: Box::new(ScheduleHandle {
                synchronous: AtomicBool::new(false),
                iface: UnsafeCell::new(None),
                requests: UnsafeCell::new(requests_tx),
                responses: UnsafeCell::new(None),
                unparker: unparker.clone(),
            }),
            requests_rx: Some(requests_rx),
            responses_tx: Some(responses_tx),
            responses_rx: Some(responses_rx),
            parker: Some(parker),
            exit: Arc::new(AtomicBool::new(false)),
            unparker,
            thread: None,
        }
    }

    /// The data pointer for the worker schedule feature.
    pub fn schedule_data(&self) -> *mut c_void {
        &*self.schedule as *const ScheduleHandle as *mut c_void
    }

    /// Wire up the plugin's worker interface once it is instantiated.
    /// Spawns the helper thread unless the plugin wants its work run
    /// synchronously. Must be called before the audio server starts
    /// invoking the process callback.
    pub fn start(&mut self, iface: WorkerIface, synchronous: bool) {
        unsafe {
            *self.schedule.iface.get() = Some(iface);
        }

        if synchronous {
            self.schedule.synchronous.store(true, Ordering::Relaxed);
            let responses_tx = self.responses_tx.take().expect("worker started twice");
            unsafe {
                *self.schedule.responses.get() = Some(responses_tx);
            }
            return;
        }

        let requests_rx = self.requests_rx.take().expect("worker started twice");
        let responses_tx = self.responses_tx.take().expect("worker started twice");
        let parker = self.parker.take().expect("worker started twice");
        let exit = Arc::clone(&self.exit);

        let handle = thread::Builder::new()
            .name(String::from("worker"))
            .spawn(move || worker_thread(requests_rx, responses_tx, parker, exit, iface))
            .expect("could not spawn the worker thread");
        self.thread = Some(handle);
    }

    /// The realtime half: the response drain used by the process cycle.
    /// Call after `start` so the interface is known.
    pub fn rt_handle(&mut self) -> WorkerRt {
        WorkerRt {
            iface: unsafe { *self.schedule.iface.get() },
            responses: self
                .responses_rx
                .take()
                .expect("the realtime worker handle was already taken"),
            scratch: vec![0u8; RESPONSE_SCRATCH_SIZE].into_boxed_slice(),
        }
    }

    /// Stop and join the helper thread. Idempotent.
    pub fn finish(&mut self) {
        self.exit.store(true, Ordering::Release);
        self.unparker.unpark();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("the worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn worker_thread(
    mut requests: BlobReceiver,
    mut responses: BlobSender,
    parker: Parker,
    exit: Arc<AtomicBool>,
    iface: WorkerIface,
) {
    let mut scratch: Vec<u8> = Vec::new();
    loop {
        parker.park();
        if exit.load(Ordering::Acquire) {
            return;
        }

        while let Some(size) = requests.recv_vec(&mut scratch) {
            unsafe {
                ((*iface.iface).work)(
                    iface.handle,
                    respond,
                    &mut responses as *mut BlobSender as LV2WorkerRespondHandle,
                    size as u32,
                    scratch.as_ptr() as *const c_void,
                );
            }
        }
    }
}

/// The worker state owned by the process cycle.
pub struct WorkerRt {
    iface: Option<WorkerIface>,
    responses: BlobReceiver,
    scratch: Box<[u8]>,
}

impl WorkerRt {
    /// Deliver queued replies to the plugin's `work_response`.
    pub fn emit_responses(&mut self) {
        let iface = match self.iface {
            Some(iface) => iface,
            None => return,
        };
        while let Some(result) = self.responses.recv(&mut self.scratch) {
            match result {
                Ok(size) => unsafe {
                    if let Some(work_response) = (*iface.iface).work_response {
                        work_response(
                            iface.handle,
                            size as u32,
                            self.scratch.as_ptr() as *const c_void,
                        );
                    }
                },
                Err(size) => {
                    warn!("dropping oversized worker reply of {size} bytes");
                }
            }
        }
    }

    /// Tell the plugin the cycle is over, if it cares.
    pub fn end_run(&mut self) {
        if let Some(iface) = self.iface {
            unsafe {
                if let Some(end_run) = (*iface.iface).end_run {
                    end_run(iface.handle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// A stand-in plugin whose `work` echoes each request back reversed.
    #[derive(Default)]
    struct TestPlugin {
        work_calls: Mutex<Vec<Vec<u8>>>,
        responses_seen: Mutex<Vec<Vec<u8>>>,
        end_runs: Mutex<u32>,
    }

    unsafe extern "C" fn test_work(
        instance: LV2Handle,
        respond: crate::lv2::LV2WorkerRespondFunction,
        handle: LV2WorkerRespondHandle,
        size: u32,
        data: *const c_void,
    ) -> LV2WorkerStatus {
        let plugin = &*(instance as *const TestPlugin);
        let request = std::slice::from_raw_parts(data as *const u8, size as usize).to_vec();
        let reply: Vec<u8> = request.iter().rev().copied().collect();
        respond(handle, reply.len() as u32, reply.as_ptr() as *const c_void);
        plugin.work_calls.lock().push(request);
        LV2_WORKER_SUCCESS
    }

    unsafe extern "C" fn test_work_response(
        instance: LV2Handle,
        size: u32,
        body: *const c_void,
    ) -> LV2WorkerStatus {
        let plugin = &*(instance as *const TestPlugin);
        let reply = std::slice::from_raw_parts(body as *const u8, size as usize).to_vec();
        plugin.responses_seen.lock().push(reply);
        LV2_WORKER_SUCCESS
    }

    unsafe extern "C" fn test_end_run(instance: LV2Handle) -> LV2WorkerStatus {
        let plugin = &*(instance as *const TestPlugin);
        *plugin.end_runs.lock() += 1;
        LV2_WORKER_SUCCESS
    }

    static TEST_IFACE: LV2WorkerInterface = LV2WorkerInterface {
        work: test_work,
        work_response: Some(test_work_response),
        end_run: Some(test_end_run),
    };

    fn iface_for(plugin: &TestPlugin) -> WorkerIface {
        WorkerIface {
            handle: plugin as *const TestPlugin as LV2Handle,
            iface: &TEST_IFACE,
        }
    }

    fn schedule(worker: &Worker, payload: &[u8]) -> LV2WorkerStatus {
        unsafe {
            schedule_work(
                worker.schedule_data(),
                payload.len() as u32,
                payload.as_ptr() as *const c_void,
            )
        }
    }

    #[test]
    fn synchronous_work_round_trips_in_one_drain() {
        let plugin = TestPlugin::default();
        let mut worker = Worker::new(1024);
        worker.start(iface_for(&plugin), true);
        let mut rt = worker.rt_handle();

        assert_eq!(schedule(&worker, &[1, 2, 3, 4]), LV2_WORKER_SUCCESS);
        assert_eq!(plugin.work_calls.lock().len(), 1);

        rt.emit_responses();
        rt.end_run();

        assert_eq!(plugin.responses_seen.lock().as_slice(), &[vec![4, 3, 2, 1]]);
        assert_eq!(*plugin.end_runs.lock(), 1);
    }

    #[test]
    fn threaded_work_reply_arrives_within_bounded_time() {
        let plugin = TestPlugin::default();
        let mut worker = Worker::new(1024);
        worker.start(iface_for(&plugin), false);
        let mut rt = worker.rt_handle();

        assert_eq!(schedule(&worker, &[0xde, 0xad, 0xbe, 0xef]), LV2_WORKER_SUCCESS);

        let deadline = Instant::now() + Duration::from_secs(5);
        while plugin.responses_seen.lock().is_empty() {
            rt.emit_responses();
            assert!(Instant::now() < deadline, "no worker reply in time");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(
            plugin.responses_seen.lock().as_slice(),
            &[vec![0xef, 0xbe, 0xad, 0xde]]
        );

        worker.finish();
    }

    #[test]
    fn requests_preserve_order() {
        let plugin = TestPlugin::default();
        let mut worker = Worker::new(1024);
        worker.start(iface_for(&plugin), false);
        let mut rt = worker.rt_handle();

        for i in 0..16u8 {
            assert_eq!(schedule(&worker, &[i]), LV2_WORKER_SUCCESS);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while plugin.responses_seen.lock().len() < 16 {
            rt.emit_responses();
            assert!(Instant::now() < deadline, "not all replies arrived");
            thread::sleep(Duration::from_millis(1));
        }
        let seen = plugin.responses_seen.lock();
        for (i, reply) in seen.iter().enumerate() {
            assert_eq!(reply.as_slice(), &[i as u8]);
        }

        worker.finish();
    }

    #[test]
    fn finish_is_idempotent_and_joins_the_thread() {
        let plugin = TestPlugin::default();
        let mut worker = Worker::new(256);
        worker.start(iface_for(&plugin), false);
        worker.finish();
        worker.finish();
        assert!(worker.thread.is_none());
    }

    #[test]
    fn inert_worker_ignores_drains() {
        let mut worker = Worker::new(256);
        let mut rt = worker.rt_handle();
        rt.emit_responses();
        rt.end_run();
    }
}
