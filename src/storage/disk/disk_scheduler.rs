use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::common::{PageId, PageKvError, Result, PAGE_SIZE};
use crate::storage::PageStore;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request. Buffers are owned by the request so the worker never
/// touches caller memory.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        reply: Sender<Result<()>>,
    },
    Sync {
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler runs all I/O against an inner store on a background worker
/// thread fed through a bounded request queue.
///
/// It is itself a `PageStore`: each call enqueues a request and blocks on its
/// completion channel, so it can sit transparently beneath the buffer pool.
pub struct DiskScheduler {
    /// The store the worker performs I/O against
    inner: Arc<dyn PageStore>,
    /// Request queue; dropped on shutdown to stop the worker
    request_sender: Option<Sender<DiskRequest>>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Queue depth before callers block on `schedule`.
    pub const QUEUE_DEPTH: usize = 128;

    /// Creates a new DiskScheduler over `inner` and spawns its worker thread.
    pub fn new(inner: Arc<dyn PageStore>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(Self::QUEUE_DEPTH);

        let store = Arc::clone(&inner);
        let worker_handle = thread::spawn(move || {
            Self::run_worker(store, receiver);
        });

        Self {
            inner,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Returns the store the worker writes to.
    pub fn inner(&self) -> &Arc<dyn PageStore> {
        &self.inner
    }

    /// Enqueues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| PageKvError::DiskScheduler("scheduler is shut down".into()))?;
        sender
            .send(request)
            .map_err(|e| PageKvError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    fn await_reply<T>(rx: Receiver<Result<T>>) -> Result<T> {
        rx.recv().map_err(|e| {
            PageKvError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// Processes requests until every sender is dropped.
    fn run_worker(store: Arc<dyn PageStore>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            Self::process_request(store.as_ref(), request);
        }
        debug!("disk scheduler worker exiting");
    }

    fn process_request(store: &dyn PageStore, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                let result = store.read_page(page_id, &mut data[..]).map(|_| data);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let _ = reply.send(store.write_page(page_id, &data[..]));
            }
            DiskRequest::Sync { reply } => {
                let _ = reply.send(store.sync());
            }
        }
    }
}

impl PageStore for DiskScheduler {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, reply: tx })?;
        let page = Self::await_reply(rx)?;
        data.copy_from_slice(&page[..]);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: page,
            reply: tx,
        })?;
        Self::await_reply(rx)
    }

    fn max_page_id(&self) -> Option<PageId> {
        self.inner.max_page_id()
    }

    fn sync(&self) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Sync { reply: tx })?;
        Self::await_reply(rx)
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        self.request_sender.take();

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
