//! Background thread that owns the engine and drains the request queue.

use crate::config::AnalysisConfig;
use crate::request::{AnalysisRequest, ResultCallback};
use crate::result::AnalysisResult;
use crate::session::{SessionDispatcher, SessionTask};
use crate::strategies::Analyzer;
use crate::{Error, Result};
use log::{debug, error, info, warn};
use specid_engine::IdentificationEngine;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

#[derive(Default)]
struct Queue {
    requests: VecDeque<AnalysisRequest>,
    running: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs analysis requests on one dedicated thread.
///
/// Requests posted before the worker wakes are drained as one batch and
/// processed in FIFO order. Every request's callback fires exactly once,
/// even if its analysis fails or panics.
pub struct AnalysisWorker {
    config: AnalysisConfig,
    dispatcher: Option<Arc<dyn SessionDispatcher>>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisWorker {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            dispatcher: None,
            shared: Arc::new(Shared::default()),
            handle: Mutex::new(None),
        }
    }

    /// Routes results of requests with a session id through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn SessionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Starts the worker thread, which takes ownership of `engine`.
    ///
    /// # Errors
    /// [`Error::AlreadyRunning`] if the worker is running, [`Error::Config`]
    /// for an invalid configuration, or [`Error::Io`] if the thread cannot
    /// be spawned.
    pub fn start<E>(&self, engine: E) -> Result<()>
    where
        E: IdentificationEngine + 'static,
    {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.config.validate()?;

        self.shared.lock().running = true;
        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        let analyzer = Analyzer::new(engine, self.config.clone());

        let spawned = thread::Builder::new()
            .name("specid-analysis".to_string())
            .spawn(move || worker_loop(&shared, analyzer, dispatcher.as_deref()));
        match spawned {
            Ok(join) => {
                *handle = Some(join);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().running = false;
                Err(e.into())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Requests waiting for the next batch.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().requests.len()
    }

    /// Queues `request`.
    ///
    /// # Errors
    /// [`Error::NotRunning`] if the worker has not been started or has been
    /// stopped.
    pub fn post(&self, request: AnalysisRequest) -> Result<()> {
        let mut queue = self.shared.lock();
        if !queue.running {
            return Err(Error::NotRunning);
        }
        debug!("Queued analysis request {}", request.number);
        queue.requests.push_back(request);
        drop(queue);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Runs `request` and blocks until its result is ready.
    ///
    /// The session id is cleared and any callback already set on the
    /// request is replaced.
    ///
    /// # Errors
    /// [`Error::NotRunning`] if the worker is not running.
    pub fn analyze_blocking(&self, mut request: AnalysisRequest) -> Result<AnalysisResult> {
        let slot = Arc::new((Mutex::new(None), Condvar::new()));
        let filler = Arc::clone(&slot);
        request.session_id.clear();
        request.set_callback(move |result| {
            let (lock, ready) = &*filler;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            ready.notify_all();
        });
        self.post(request)?;

        let (lock, ready) = &*slot;
        let mut result = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(done) = result.take() {
                return Ok(done);
            }
            result = ready.wait(result).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops accepting requests, waits for queued work to finish, and joins
    /// the thread.
    ///
    /// # Errors
    /// [`Error::NotRunning`] if the worker was never started or already
    /// stopped, [`Error::LogicError`] if the thread panicked.
    pub fn stop(&self) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(join) = handle.take() else {
            return Err(Error::NotRunning);
        };

        let mut queue = self.shared.lock();
        queue.running = false;
        self.shared.changed.notify_all();
        while !queue.requests.is_empty() {
            queue = self
                .shared
                .changed
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(queue);

        join.join()
            .map_err(|_| Error::LogicError("analysis worker thread panicked".to_string()))
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        let started = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if started {
            if let Err(e) = self.stop() {
                warn!("Analysis worker did not stop cleanly: {e}");
            }
        }
    }
}

fn worker_loop<E: IdentificationEngine>(
    shared: &Shared,
    mut analyzer: Analyzer<E>,
    dispatcher: Option<&dyn SessionDispatcher>,
) {
    info!("Analysis worker started");
    loop {
        let batch: Vec<AnalysisRequest> = {
            let mut queue = shared.lock();
            while queue.requests.is_empty() && queue.running {
                queue = shared
                    .changed
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if queue.requests.is_empty() {
                break;
            }
            queue.requests.drain(..).collect()
        };
        shared.changed.notify_all();

        debug!("Processing batch of {} requests", batch.len());
        for request in batch {
            process(&mut analyzer, request, dispatcher);
        }
    }
    shared.changed.notify_all();
    info!("Analysis worker stopped");
}

fn process<E: IdentificationEngine>(
    analyzer: &mut Analyzer<E>,
    mut request: AnalysisRequest,
    dispatcher: Option<&dyn SessionDispatcher>,
) {
    let callback = request.take_callback();
    let number = request.number;

    let result = match panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&request))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Analysis request {number} panicked: {message}");
            // Engine state is unknown after a panic mid-call.
            analyzer.invalidate_engine();
            let mut result = AnalysisResult::new(number, request.drf.clone());
            result.set_error(&Error::LogicError(format!("analysis panicked: {message}")));
            result
        }
    };

    deliver(number, &request.session_id, result, callback, dispatcher);
}

fn deliver(
    number: u64,
    session_id: &str,
    result: AnalysisResult,
    callback: Option<ResultCallback>,
    dispatcher: Option<&dyn SessionDispatcher>,
) {
    let Some(callback) = callback else {
        error!("Analysis request {number} has no callback; result dropped");
        return;
    };

    let task: SessionTask = Box::new(move || callback(result));
    if session_id.is_empty() {
        invoke(number, task);
        return;
    }

    let Some(dispatcher) = dispatcher else {
        error!("No session dispatcher for request {number}; invoking callback directly");
        invoke(number, task);
        return;
    };
    if let Err(task) = dispatcher.post(session_id, task) {
        error!("Could not post result {number} to session '{session_id}'; invoking callback directly");
        invoke(number, task);
    }
}

fn invoke(number: u64, task: SessionTask) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(
            "Callback for analysis request {number} panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
