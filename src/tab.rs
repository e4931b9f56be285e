//! Script-visible browser tabs.
//!
//! `tab.new(url)` opens a driver tab, registers it as a live sub-context on
//! the environment, and hands the script a userdata handle. Every driver
//! call goes through the async bridge; driver events (dialogs, downloads)
//! re-enter through the dispatcher.

use crate::driver::{Driver, DriverTab, EventSink, TabEvent, Viewport};
use crate::runtime::environment::{Environment, SubContext};
use crate::runtime::error::HostError;
use crate::runtime::value::Value;
use mlua::{Function, UserData, UserDataMethods};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;

pub(crate) struct TabState {
    env: Weak<Environment>,
    page: Arc<dyn DriverTab>,
    dialog_handler: Mutex<Option<Function>>,
    closed: AtomicBool,
    shots: AtomicU64,
}

/// The userdata handle the script holds.
pub struct Tab(Arc<TabState>);

impl TabState {
    fn env(&self) -> mlua::Result<Arc<Environment>> {
        self.env
            .upgrade()
            .ok_or_else(|| HostError::other("environment is shut down").into_lua())
    }

    /// Run one blocking driver operation through the bridge.
    fn drive<T, F>(&self, op: F) -> mlua::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn DriverTab>) -> Result<T, HostError> + Send + 'static,
    {
        let env = self.env()?;
        let page = Arc::clone(&self.page);
        env.run_async(|| env.run_blocking(move || op(page)))
    }

    /// Entry point for driver-owned threads; never called with the handle
    /// held.
    fn handle_event(state: &Arc<TabState>, event: TabEvent) {
        let Some(env) = state.env.upgrade() else {
            return;
        };
        match event {
            TabEvent::Dialog {
                kind,
                message,
                respond,
            } => {
                let handler = state.dialog_handler.lock().unwrap().clone();
                let accept = match handler {
                    Some(handler) => {
                        let args = [Value::from(kind.as_str()), Value::from(message.as_str())];
                        truthy(env.dispatch(&handler, &args, 1).first())
                    }
                    // No handler: dismiss.
                    None => false,
                };
                let _ = respond.send(accept);
            }
            TabEvent::DownloadBegin { guid, filename } => {
                env.storage().start_download(&guid, &filename);
            }
            TabEvent::DownloadComplete { guid } => {
                env.storage().complete_download(&guid);
            }
            TabEvent::DownloadCanceled { guid } => {
                env.storage().cancel_download(&guid);
            }
        }
    }
}

fn truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Nil) | Some(Value::Bool(false)))
}

impl SubContext for TabState {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.page.close();
        }
    }
}

impl UserData for Tab {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("go", |_, this, url: String| {
            this.0.drive(move |page| page.navigate(&url))
        });
        methods.add_method("back", |_, this, ()| this.0.drive(|page| page.back()));
        methods.add_method("forward", |_, this, ()| this.0.drive(|page| page.forward()));
        methods.add_method("reload", |_, this, ()| this.0.drive(|page| page.reload()));
        methods.add_method("url", |_, this, ()| this.0.drive(|page| page.url()));
        methods.add_method("title", |_, this, ()| this.0.drive(|page| page.title()));
        methods.add_method("viewport", |_, this, ()| {
            let viewport = this.0.drive(|page| page.viewport())?;
            Ok((viewport.width, viewport.height))
        });
        methods.add_method("setviewport", |_, this, (width, height): (u32, u32)| {
            this.0
                .drive(move |page| page.set_viewport(Viewport { width, height }))
        });
        methods.add_method("screenshot", |_, this, name: Option<String>| {
            let env = this.0.env()?;
            let data = this.0.drive(|page| page.screenshot())?;
            let shot = this.0.shots.fetch_add(1, Ordering::SeqCst);
            let name = name.unwrap_or_else(|| format!("{shot:03}"));
            // The capture is in hand; the disk write happens in the
            // background so the script does not wait on it.
            let (ready_tx, ready_rx) = oneshot::channel();
            env.schedule_artifact(&name, ".png", ready_rx);
            let _ = ready_tx.send(data);
            Ok(())
        });
        methods.add_method("ondialog", |_, this, handler: Function| {
            *this.0.dialog_handler.lock().unwrap() = Some(handler);
            Ok(())
        });
        methods.add_method("close", |_, this, ()| {
            let env = this.0.env()?;
            let state = Arc::clone(&this.0);
            env.run_async(|| {
                env.run_blocking(move || {
                    SubContext::close(&*state);
                    Ok(())
                })
            })?;
            let context: Arc<dyn SubContext> = this.0.clone();
            env.unregister_context(&context);
            Ok(())
        });
    }
}

/// Register the `tab` type against a driver.
pub fn register(env: &Arc<Environment>, driver: Arc<dyn Driver>) -> mlua::Result<()> {
    let weak = Arc::downgrade(env);
    let new = env.lua().create_function(move |_, url: Option<String>| {
        let env = weak
            .upgrade()
            .ok_or_else(|| HostError::other("environment is shut down").into_lua())?;

        let driver = Arc::clone(&driver);
        let page = env.run_async(|| env.run_blocking(move || driver.open_tab()))?;

        let state = Arc::new(TabState {
            env: weak.clone(),
            page,
            dialog_handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            shots: AtomicU64::new(0),
        });
        let sink: EventSink = {
            let state = Arc::downgrade(&state);
            Box::new(move |event| {
                if let Some(state) = state.upgrade() {
                    TabState::handle_event(&state, event);
                }
            })
        };
        state.page.set_event_sink(sink);
        env.register_context(Arc::clone(&state) as Arc<dyn SubContext>);

        if let Some(url) = url {
            let page = Arc::clone(&state.page);
            env.run_async(|| env.run_blocking(move || page.navigate(&url)))?;
        }
        Ok(Tab(state))
    })?;
    env.register_type("tab", vec![("new", new)], vec![])
}
