//! The scripting environment: one interpreter instance, its exclusive
//! execution handle, the async bridge, the event dispatcher and the
//! top-level evaluation supervisor.
//!
//! Collaborators extend the script namespace through the registration
//! functions, run blocking work through [`Environment::run_async`], and
//! re-enter from host-originated events through [`Environment::dispatch`].
//! The environment and the interpreter are created together and destroyed
//! together.

use crate::record::Logger;
use crate::runtime::config::Config;
use crate::runtime::convert::{pack, unpack};
use crate::runtime::error::{Error, HostError};
use crate::runtime::handle::ExecHandle;
use crate::runtime::tasks::BackgroundTasks;
use crate::runtime::value::Value;
use crate::storage::Storage;
use mlua::{
    Function, HookTriggers, Lua, MultiValue, Table, Value as LuaValue, VmState,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// An auxiliary execution context (e.g. a browser tab) tied to the
/// environment's lifecycle.
pub trait SubContext: Send + Sync {
    fn close(&self);
}

/// One scripting environment bound to one interpreter instance.
///
/// Exactly one actor holds the execution handle at any instant; the
/// constructing path takes it on behalf of the script and keeps it across
/// [`Environment::run`] calls until [`Environment::close`].
pub struct Environment {
    lua: Lua,
    handle: ExecHandle,
    rt: Runtime,
    config: Config,
    storage: Arc<Storage>,
    logger: Arc<Logger>,
    cancel: CancelState,
    fatal_tx: mpsc::Sender<Error>,
    fatal_rx: Mutex<mpsc::Receiver<Error>>,
    contexts: Mutex<Vec<Arc<dyn SubContext>>>,
    tasks: BackgroundTasks,
    closed: AtomicBool,
}

struct CancelState {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
    deadline_hit: AtomicBool,
}

impl Environment {
    pub fn new(
        storage: Arc<Storage>,
        logger: Arc<Logger>,
        config: Config,
    ) -> mlua::Result<Arc<Environment>> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(mlua::Error::external)?;
        let root = CancellationToken::new();
        let current = root.child_token();
        // Single-capacity slot: at most one escalated error at a time.
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        let env = Arc::new(Environment {
            lua: Lua::new(),
            handle: ExecHandle::new(),
            rt,
            config,
            storage,
            logger,
            cancel: CancelState {
                root,
                current: Mutex::new(current),
                deadline_hit: AtomicBool::new(false),
            },
            fatal_tx,
            fatal_rx: Mutex::new(fatal_rx),
            contexts: Mutex::new(Vec::new()),
            tasks: BackgroundTasks::new(),
            closed: AtomicBool::new(false),
        });

        env.handle.lock();
        env.install_hook();
        env.spawn_deadline();
        env.register_builtins()?;
        Ok(env)
    }

    pub fn handle(&self) -> &ExecHandle {
        &self.handle
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Observable cancellation state of the ambient run context.
    pub fn is_cancelled(&self) -> bool {
        self.current_token().is_cancelled()
    }

    /// Abort the evaluation in flight: pending bridge waits return
    /// `"interrupted"` and the instruction hook stops pure-Lua loops.
    pub fn interrupt(&self) {
        self.cancel_current();
    }

    // ---- registration ---------------------------------------------------

    /// Extend the script namespace with a native-backed function.
    pub fn register_function<F, A, R>(&self, name: &str, func: F) -> mlua::Result<()>
    where
        F: Fn(&Lua, A) -> mlua::Result<R> + Send + 'static,
        A: mlua::FromLuaMulti,
        R: mlua::IntoLuaMulti,
    {
        let func = self.lua.create_function(func)?;
        self.lua.globals().set(name, func)
    }

    /// Extend the script namespace with a table of fields, optionally with a
    /// metatable.
    pub fn register_table(
        &self,
        name: &str,
        fields: Vec<(&str, LuaValue)>,
        metadata: Vec<(&str, LuaValue)>,
    ) -> mlua::Result<()> {
        let table = self.lua.create_table()?;
        for (key, value) in fields {
            table.set(key, value)?;
        }
        if !metadata.is_empty() {
            let meta = self.lua.create_table()?;
            for (key, value) in metadata {
                meta.set(key, value)?;
            }
            table.set_metatable(Some(meta));
        }
        self.lua.globals().set(name, table)
    }

    /// Register a named type: a global table of methods plus constant
    /// fields. The environment is agnostic to their semantics.
    pub fn register_type(
        &self,
        name: &str,
        methods: Vec<(&str, Function)>,
        fields: Vec<(&str, LuaValue)>,
    ) -> mlua::Result<()> {
        let table = self.lua.create_table()?;
        for (key, method) in methods {
            table.set(key, method)?;
        }
        for (key, value) in fields {
            table.set(key, value)?;
        }
        self.lua.globals().set(name, table)
    }

    /// Build a table while holding the handle; for callers that are not on
    /// the script path.
    pub fn build_table(
        &self,
        build: impl FnOnce(&Lua, &Table) -> mlua::Result<()>,
    ) -> mlua::Result<Table> {
        let _guard = self.handle.locked();
        let table = self.lua.create_table()?;
        build(&self.lua, &table)?;
        Ok(table)
    }

    // ---- async bridge ---------------------------------------------------

    /// Cooperative preemption point: give any waiter the handle, then take
    /// it back.
    pub fn yield_now(&self) {
        self.handle.yield_now();
    }

    /// Release the handle for the duration of `f`, reacquire it, and raise
    /// `f`'s error (if any) inside the interpreter: `"timeout"` for missed
    /// deadlines, `"interrupted"` for cancellation, the message verbatim
    /// otherwise.
    ///
    /// While `f` runs, any other actor may take the handle and mutate
    /// interpreter state; `f` must never assume exclusivity and must not
    /// touch interpreter state itself.
    pub fn run_async<T>(&self, f: impl FnOnce() -> Result<T, HostError>) -> mlua::Result<T> {
        self.handle.unlock();
        let out = f();
        self.handle.lock();
        out.map_err(HostError::into_lua)
    }

    /// Await `future` on the shared runtime, racing the ambient
    /// cancellation. Intended for use inside [`Environment::run_async`]
    /// closures.
    pub fn wait<T>(&self, future: impl Future<Output = Result<T, HostError>>) -> Result<T, HostError> {
        let token = self.current_token();
        self.rt.block_on(async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(self.cancel_cause()),
                out = future => out,
            }
        })
    }

    /// Run blocking collaborator work under the per-operation deadline,
    /// racing the ambient cancellation.
    pub fn run_blocking<T, F>(&self, op: F) -> Result<T, HostError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, HostError> + Send + 'static,
    {
        let deadline = self.config.op_deadline;
        self.wait(async move {
            let joined = tokio::time::timeout(deadline, tokio::task::spawn_blocking(op)).await?;
            joined.map_err(|join| HostError::Other(join.to_string()))?
        })
    }

    // ---- event dispatch -------------------------------------------------

    /// Invoke a script callback from a host-originated event.
    ///
    /// Runs `handler` on an isolated interpreter thread (own call stack,
    /// shared global state) while holding the handle end-to-end, and
    /// captures up to `nresults` return values. A raising callback has no
    /// synchronous caller to unwind into; its error is escalated through the
    /// fatal error slot and the dispatch returns no results.
    pub fn dispatch(&self, handler: &Function, args: &[Value], nresults: usize) -> Vec<Value> {
        let _guard = self.handle.locked();
        match self.dispatch_locked(handler, args, nresults) {
            Ok(results) => results,
            Err(err) => {
                self.escalate(err);
                Vec::new()
            }
        }
    }

    fn dispatch_locked(
        &self,
        handler: &Function,
        args: &[Value],
        nresults: usize,
    ) -> Result<Vec<Value>, Error> {
        let mut packed = Vec::with_capacity(args.len());
        for arg in args {
            packed.push(pack(&self.lua, arg).map_err(Error::from_lua)?);
        }
        let thread = self
            .lua
            .create_thread(handler.clone())
            .map_err(Error::from_lua)?;
        let returned = thread
            .resume::<MultiValue>(MultiValue::from_iter(packed))
            .map_err(Error::from_lua)?;

        let mut results = Vec::with_capacity(nresults);
        for value in returned.iter().take(nresults) {
            results.push(unpack(value)?);
        }
        Ok(results)
    }

    /// Push an error into the fatal slot. First error wins; while the slot
    /// is full, later errors are logged and dropped.
    fn escalate(&self, err: Error) {
        match self.fatal_tx.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                tracing::warn!(error = %err, "fatal error slot is full; dropping");
            }
            Err(mpsc::error::TrySendError::Closed(err)) => {
                tracing::warn!(error = %err, "fatal error slot is closed; dropping");
            }
        }
    }

    // ---- top-level evaluation -------------------------------------------

    /// Execute a chunk to completion, racing fatal errors escalated from
    /// dispatched callbacks.
    ///
    /// The select is biased toward the script path's own completion: an
    /// escalated error wins only when it arrives while the path is still
    /// running. On escalation the ambient context is cancelled (unblocking
    /// pending bridge waits), the script path is awaited to actual
    /// termination, and a fresh cancelable context is re-armed so follow-up
    /// evaluations are not permanently cancelled.
    pub fn run(self: &Arc<Self>, source: &str, name: &str) -> Result<(), Error> {
        self.drain_stale_fatal();

        let (done_tx, done_rx) = oneshot::channel();
        let env = Arc::clone(self);
        let source = source.to_string();
        let chunk_name = name.to_string();
        std::thread::Builder::new()
            .name("webrun-script".to_string())
            .spawn(move || {
                let result = env
                    .lua
                    .load(&source)
                    .set_name(chunk_name)
                    .exec()
                    .map_err(Error::from_lua);
                let _ = done_tx.send(result);
            })?;

        let mut fatal_rx = self.fatal_rx.lock().unwrap();
        let mut done_rx = done_rx;
        self.rt.block_on(async {
            tokio::select! {
                biased;
                done = &mut done_rx => done.unwrap_or_else(|_| Err(script_thread_lost())),
                fatal = fatal_rx.recv() => match fatal {
                    Some(err) => {
                        self.cancel_current();
                        let _ = (&mut done_rx).await;
                        self.rearm();
                        Err(err)
                    }
                    // The slot outlives the environment; closure means teardown.
                    None => (&mut done_rx).await.unwrap_or_else(|_| Err(script_thread_lost())),
                },
            }
        })
    }

    fn drain_stale_fatal(&self) {
        let mut fatal_rx = self.fatal_rx.lock().unwrap();
        while let Ok(err) = fatal_rx.try_recv() {
            tracing::warn!(error = %err, "dropping fatal error escalated after the previous run");
        }
    }

    fn cancel_current(&self) {
        self.cancel.current.lock().unwrap().cancel();
    }

    fn rearm(&self) {
        *self.cancel.current.lock().unwrap() = self.cancel.root.child_token();
    }

    pub(crate) fn current_token(&self) -> CancellationToken {
        self.cancel.current.lock().unwrap().clone()
    }

    fn cancel_cause(&self) -> HostError {
        if self.cancel.deadline_hit.load(Ordering::SeqCst) {
            HostError::DeadlineExceeded
        } else {
            HostError::Canceled
        }
    }

    // ---- sub-contexts and background work -------------------------------

    /// Add a live sub-context; mutated only under the registry's own lock.
    pub fn register_context(&self, context: Arc<dyn SubContext>) {
        self.contexts.lock().unwrap().push(context);
    }

    pub fn unregister_context(&self, context: &Arc<dyn SubContext>) {
        self.contexts
            .lock()
            .unwrap()
            .retain(|entry| !Arc::ptr_eq(entry, context));
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    /// Schedule a background artifact write. The write waits for its bytes
    /// on `rx` (the upstream ready signal), then lands in storage; shutdown
    /// waits for it regardless of outcome.
    pub fn schedule_artifact(&self, name: &str, ext: &str, rx: oneshot::Receiver<Vec<u8>>) {
        let path = self.storage.reserve(name, ext);
        self.tasks.schedule(self.rt.handle(), async move {
            match rx.await {
                Ok(data) => {
                    if let Err(err) = tokio::fs::write(&path, data).await {
                        tracing::warn!(path = %path.display(), error = %err, "artifact write failed");
                    }
                }
                Err(_) => {
                    tracing::debug!(path = %path.display(), "artifact source dropped before producing data");
                }
            }
        });
    }

    /// Tear down: close every live sub-context, cancel the ambient context,
    /// and wait for outstanding background writes. Must be called by the
    /// handle-holding path; the interpreter dies with the environment.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let contexts: Vec<_> = self.contexts.lock().unwrap().drain(..).collect();
        for context in contexts {
            context.close();
        }
        self.cancel.root.cancel();
        self.tasks.wait(self.rt.handle());
        self.handle.unlock();
    }

    // ---- internals ------------------------------------------------------

    /// Instruction-count hook: aborts the running chunk once the ambient
    /// context is cancelled, so pure-Lua loops cannot outlive a fatal error.
    fn install_hook(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.config.hook_interval),
            move |_lua, _debug| {
                if let Some(env) = weak.upgrade() {
                    if env.current_token().is_cancelled() {
                        return Err(env.cancel_cause().into_lua());
                    }
                }
                Ok(VmState::Continue)
            },
        );
    }

    /// Arm the whole-run budget: when it elapses the root context cancels
    /// with a timeout classification.
    fn spawn_deadline(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let root = self.cancel.root.clone();
        let budget = self.config.run_timeout;
        self.rt.spawn(async move {
            tokio::select! {
                _ = root.cancelled() => {}
                _ = tokio::time::sleep(budget) => {
                    if let Some(env) = weak.upgrade() {
                        env.cancel.deadline_hit.store(true, Ordering::SeqCst);
                        env.cancel.root.cancel();
                    }
                }
            }
        });
    }

    fn register_builtins(self: &Arc<Self>) -> mlua::Result<()> {
        let weak = Arc::downgrade(self);
        self.register_function("print", move |_, args: MultiValue| {
            if let Some(env) = weak.upgrade() {
                let mut parts = Vec::with_capacity(args.len());
                for value in args.iter() {
                    parts.push(match unpack(value) {
                        Ok(value) => value.to_string(),
                        Err(err) => return Err(mlua::Error::external(err)),
                    });
                }
                env.logger.print(parts.join("\t"));
            }
            Ok(())
        })?;

        self.register_function("assert_eq", |_, (a, b): (LuaValue, LuaValue)| {
            let left = unpack(&a).map_err(mlua::Error::external)?;
            let right = unpack(&b).map_err(mlua::Error::external)?;
            if left != right {
                return Err(mlua::Error::RuntimeError(format!(
                    "assertion failed: {left} ~= {right}"
                )));
            }
            Ok(())
        })?;

        self.register_function("assert_ne", |_, (a, b): (LuaValue, LuaValue)| {
            let left = unpack(&a).map_err(mlua::Error::external)?;
            let right = unpack(&b).map_err(mlua::Error::external)?;
            if left == right {
                return Err(mlua::Error::RuntimeError(format!(
                    "assertion failed: both sides are {left}"
                )));
            }
            Ok(())
        })
    }
}

fn script_thread_lost() -> Error {
    Error::Script {
        message: "script thread terminated unexpectedly".to_string(),
        trace: None,
    }
}
