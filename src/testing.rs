//! In-memory [`ClusterClient`] double used by unit and end-to-end tests.
//!
//! Every remote entry point bumps a call counter so tests can assert that a
//! rejected request never reached the cluster. Watch streams and log readers
//! carry a guard that bumps a teardown counter when they are dropped.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{DynamicObject, WatchEvent};
use kube::discovery::ApiResource;
use tokio::io::{duplex, DuplexStream};

use crate::cluster::{
    ClusterClient, ContextInfo, DiscoveredResource, Listing, LogReader, ProcessInput,
    ProcessOutput, RemoteProcess, ResourceKind, Selectors, WatchStream,
};
use crate::error::{Error, Result};
use crate::stream::exec::ExecRequest;
use crate::stream::logs::LogRequest;

pub fn pod(name: &str) -> DynamicObject {
    DynamicObject::new(name, &ApiResource::erase::<Pod>(&())).within("default")
}

/// How a scripted stream behaves once its items run out.
#[derive(Clone)]
pub enum End {
    /// Clean end of stream.
    Close,
    /// A transport-level error.
    Fail(String),
    /// Stay open until dropped.
    Pending,
}

#[derive(Default)]
pub struct Calls {
    pub list: AtomicUsize,
    pub watch: AtomicUsize,
    pub get: AtomicUsize,
    pub delete: AtomicUsize,
    pub replace: AtomicUsize,
    pub logs: AtomicUsize,
    pub exec: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.list,
            &self.watch,
            &self.get,
            &self.delete,
            &self.replace,
            &self.logs,
            &self.exec,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

enum WatchScript {
    Events(Vec<WatchEvent<DynamicObject>>, End),
    Endless(DynamicObject),
}

#[derive(Default)]
pub struct FakeCluster {
    pub calls: Calls,
    pub watch_teardowns: Arc<AtomicUsize>,
    pub log_teardowns: Arc<AtomicUsize>,
    context: ContextInfo,
    listing: Mutex<Listing>,
    last_list: Mutex<Option<(String, String, Selectors)>>,
    list_error: Mutex<Option<String>>,
    watch_error: Mutex<Option<String>>,
    watch_script: Mutex<Option<WatchScript>>,
    last_watch_version: Mutex<Option<String>>,
    logs: Mutex<Option<(Vec<Vec<u8>>, End)>>,
    last_log_request: Mutex<Option<LogRequest>>,
    exec_process: Mutex<Option<FakeProcess>>,
    last_exec_request: Mutex<Option<ExecRequest>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            context: ContextInfo {
                name: "fake".to_string(),
                cluster: "fake-cluster".to_string(),
                user: "fake-admin".to_string(),
            },
            ..Self::default()
        }
    }

    pub fn with_listing(self, resource_version: &str, items: Vec<DynamicObject>) -> Self {
        *self.listing.lock().unwrap() = Listing {
            resource_version: resource_version.to_string(),
            items,
        };
        self
    }

    pub fn with_list_error(self, message: &str) -> Self {
        *self.list_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_watch_error(self, message: &str) -> Self {
        *self.watch_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_watch(self, events: Vec<WatchEvent<DynamicObject>>, end: End) -> Self {
        *self.watch_script.lock().unwrap() = Some(WatchScript::Events(events, end));
        self
    }

    /// A watch that yields `MODIFIED` for `object` forever.
    pub fn with_endless_watch(self, object: DynamicObject) -> Self {
        *self.watch_script.lock().unwrap() = Some(WatchScript::Endless(object));
        self
    }

    pub fn with_logs(self, chunks: Vec<&[u8]>, end: End) -> Self {
        *self.logs.lock().unwrap() = Some((chunks.into_iter().map(<[u8]>::to_vec).collect(), end));
        self
    }

    pub fn with_exec(self, process: FakeProcess) -> Self {
        *self.exec_process.lock().unwrap() = Some(process);
        self
    }

    pub fn teardowns(&self) -> usize {
        self.watch_teardowns.load(Ordering::SeqCst)
    }

    pub fn log_teardowns(&self) -> usize {
        self.log_teardowns.load(Ordering::SeqCst)
    }

    /// Kind, namespace and selectors of the most recent list call.
    pub fn last_list(&self) -> Option<(String, String, Selectors)> {
        self.last_list.lock().unwrap().clone()
    }

    pub fn last_watch_version(&self) -> Option<String> {
        self.last_watch_version.lock().unwrap().clone()
    }

    pub fn last_log_request(&self) -> Option<LogRequest> {
        self.last_log_request.lock().unwrap().clone()
    }

    pub fn last_exec_request(&self) -> Option<ExecRequest> {
        self.last_exec_request.lock().unwrap().clone()
    }
}

/// Bumps the shared counter when dropped together with its stream.
struct TeardownGuard(Arc<AtomicUsize>);

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list(&self, kind: &ResourceKind, ns: &str, sel: &Selectors) -> Result<Listing> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        *self.last_list.lock().unwrap() =
            Some((kind.name.to_string(), ns.to_string(), sel.clone()));
        if let Some(message) = self.list_error.lock().unwrap().clone() {
            return Err(Error::Remote(message));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn watch(
        &self,
        _kind: &ResourceKind,
        _ns: &str,
        _sel: &Selectors,
        resource_version: &str,
    ) -> Result<WatchStream> {
        self.calls.watch.fetch_add(1, Ordering::SeqCst);
        *self.last_watch_version.lock().unwrap() = Some(resource_version.to_string());
        if let Some(message) = self.watch_error.lock().unwrap().clone() {
            return Err(Error::Remote(message));
        }

        let guard = TeardownGuard(Arc::clone(&self.watch_teardowns));
        let script = self
            .watch_script
            .lock()
            .unwrap()
            .take()
            .unwrap_or(WatchScript::Events(Vec::new(), End::Pending));
        let stream: WatchStream = match script {
            WatchScript::Events(events, end) => {
                let head = futures::stream::iter(events.into_iter().map(Ok));
                match end {
                    End::Close => head.boxed(),
                    End::Fail(message) => head
                        .chain(futures::stream::once(async move {
                            Err(Error::Remote(message))
                        }))
                        .boxed(),
                    End::Pending => head.chain(futures::stream::pending()).boxed(),
                }
            }
            WatchScript::Endless(object) => {
                futures::stream::repeat_with(move || Ok(WatchEvent::Modified(object.clone())))
                    .boxed()
            }
        };
        Ok(stream
            .map(move |item| {
                let _ = &guard;
                item
            })
            .boxed())
    }

    async fn get(&self, _kind: &ResourceKind, _ns: &str, name: &str) -> Result<DynamicObject> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.listing
            .lock()
            .unwrap()
            .items
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| Error::Remote(format!("{name} not found")))
    }

    async fn delete(&self, _kind: &ResourceKind, _ns: &str, _name: &str) -> Result<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace(
        &self,
        _kind: &ResourceKind,
        _ns: &str,
        _name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.calls.replace.fetch_add(1, Ordering::SeqCst);
        let mut stored = object.clone();
        stored.metadata.resource_version = Some("2".to_string());
        Ok(stored)
    }

    async fn server_version(&self) -> Result<Info> {
        Ok(Info {
            git_version: "v1.28.3".to_string(),
            major: "1".to_string(),
            minor: "28".to_string(),
            ..Info::default()
        })
    }

    async fn discover(&self) -> Result<Vec<DiscoveredResource>> {
        Ok(vec![
            DiscoveredResource {
                name: "pods".to_string(),
                kind: "Pod".to_string(),
                group_version: "v1".to_string(),
                namespaced: true,
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                short_names: vec!["po".to_string()],
            },
            DiscoveredResource {
                name: "widgets".to_string(),
                kind: "Widget".to_string(),
                group_version: "example.com/v1".to_string(),
                namespaced: true,
                verbs: vec!["get".to_string(), "list".to_string()],
                short_names: Vec::new(),
            },
        ])
    }

    fn context(&self) -> Option<&ContextInfo> {
        Some(&self.context)
    }

    async fn log_stream(&self, request: &LogRequest) -> Result<LogReader> {
        self.calls.logs.fetch_add(1, Ordering::SeqCst);
        *self.last_log_request.lock().unwrap() = Some(request.clone());
        let (chunks, end) = self
            .logs
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Remote(format!("pods \"{}\" not found", request.pod)))?;
        Ok(Box::pin(ScriptedReader {
            chunks: chunks.into(),
            end,
            _guard: TeardownGuard(Arc::clone(&self.log_teardowns)),
        }))
    }

    async fn exec(&self, request: &ExecRequest) -> Result<Box<dyn RemoteProcess>> {
        self.calls.exec.fetch_add(1, Ordering::SeqCst);
        *self.last_exec_request.lock().unwrap() = Some(request.clone());
        let process = self
            .exec_process
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Remote("unable to upgrade connection".to_string()))?;
        Ok(Box::new(process))
    }
}

/// Log source that yields each scripted chunk from a separate read. Bumps
/// `log_teardowns` when dropped.
struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    end: End,
    _guard: TeardownGuard,
}

impl futures::io::AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(mut chunk) = self.chunks.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            return Poll::Ready(Ok(n));
        }
        match &self.end {
            End::Close => Poll::Ready(Ok(0)),
            End::Fail(message) => Poll::Ready(Err(io::Error::other(message.clone()))),
            End::Pending => Poll::Pending,
        }
    }
}

/// Remote process built from in-memory pipes.
pub struct FakeProcess {
    stdin: Option<DuplexStream>,
    output: Option<DuplexStream>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    released: Arc<AtomicBool>,
    failure: Option<String>,
}

/// Test-side ends of a [`FakeProcess`].
pub struct FakeRemote {
    /// Everything the bridge writes to the process's stdin.
    pub stdin: DuplexStream,
    /// Write here to produce process output; drop to signal exit.
    pub output: DuplexStream,
    pub resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    pub released: Arc<AtomicBool>,
}

impl FakeProcess {
    pub fn new() -> (Self, FakeRemote) {
        let (stdin_local, stdin_remote) = duplex(64 * 1024);
        let (output_local, output_remote) = duplex(64 * 1024);
        let resizes = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));
        (
            Self {
                stdin: Some(stdin_local),
                output: Some(output_remote),
                resizes: Arc::clone(&resizes),
                released: Arc::clone(&released),
                failure: None,
            },
            FakeRemote {
                stdin: stdin_remote,
                output: output_local,
                resizes,
                released,
            },
        )
    }

    /// Report `message` as the process's failure status.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[async_trait]
impl RemoteProcess for FakeProcess {
    fn take_stdin(&mut self) -> Option<ProcessInput> {
        self.stdin.take().map(|s| Box::new(s) as ProcessInput)
    }

    fn take_outputs(&mut self) -> Vec<ProcessOutput> {
        self.output
            .take()
            .map(|s| vec![Box::new(s) as ProcessOutput])
            .unwrap_or_default()
    }

    async fn resize(&mut self, width: u16, height: u16) {
        self.resizes.lock().unwrap().push((width, height));
    }

    async fn finish(mut self: Box<Self>) -> Option<String> {
        self.failure.take()
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
