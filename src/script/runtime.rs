// src/script/runtime.rs
use super::convert::{builtin_args, check_signatures, script_value, Captured};
use super::{Callable, RuntimeLimits, ScriptSource, ScriptValue};
use crate::error::{CallableRole, Error, Result};
use crate::ingest::types::Entry;
use crate::registry::Registry;
use metrics::counter;
use rhai::{Dynamic, Engine, EvalAltResult, Map, AST};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Reply = std::result::Result<ScriptValue, String>;
type Table = Rc<RefCell<Vec<Captured>>>;
/// Last error raised by a builtin, with the message the script saw.
type BuiltinError = Rc<RefCell<Option<(String, Error)>>>;

struct Invocation {
    role: CallableRole,
    callable: Callable,
    view: Value,
    reply: oneshot::Sender<Reply>,
}

/// Cloneable, `Send` handle for calling script functions from any task.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<Invocation>,
}

impl RuntimeHandle {
    /// Call `callable` with the entry's key-value view.
    pub async fn invoke(
        &self,
        role: CallableRole,
        callable: &Callable,
        entry: &Entry,
    ) -> Result<ScriptValue> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Invocation {
                role,
                callable: callable.clone(),
                view: entry.script_view(),
                reply,
            })
            .map_err(|_| Error::RuntimeGone)?;
        match answer.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::Callable {
                role,
                name: callable.name().to_string(),
                message,
            }),
            Err(_) => Err(Error::RuntimeGone),
        }
    }
}

/// Owner of the script thread. Dropping it (and every handle) stops the thread.
pub struct ScriptRuntime {
    handle: RuntimeHandle,
    thread: std::thread::JoinHandle<()>,
}

impl ScriptRuntime {
    /// Start the runtime thread, expose every builtin of `registry`, run the
    /// script to completion and freeze the registry.
    ///
    /// Any failure while loading (syntax, runtime, bad builtin arguments) is
    /// returned here and no fetch should start.
    pub async fn load(
        registry: Arc<Registry>,
        script: ScriptSource,
        limits: RuntimeLimits,
    ) -> Result<Self> {
        let origin = script.origin.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("script-runtime".into())
            .spawn(move || serve(registry, script, limits, rx, loaded_tx))
            .map_err(|e| Error::Script {
                origin: origin.clone(),
                message: format!("starting script thread: {e}"),
            })?;

        match loaded_rx.await {
            Ok(Ok(())) => Ok(Self {
                handle: RuntimeHandle { tx },
                thread,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::Script {
                origin,
                message: "script thread exited while loading".into(),
            }),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

fn serve(
    registry: Arc<Registry>,
    script: ScriptSource,
    limits: RuntimeLimits,
    mut rx: mpsc::UnboundedReceiver<Invocation>,
    loaded: oneshot::Sender<Result<()>>,
) {
    let table: Table = Rc::default();
    let config_error: BuiltinError = Rc::default();
    let engine = build_engine(&registry, &table, &config_error, limits);

    let ast = match load_script(&engine, &script, &table, &config_error) {
        Ok(ast) => ast,
        Err(err) => {
            let _ = loaded.send(Err(err));
            return;
        }
    };
    registry.freeze();
    info!(
        origin = %script.origin,
        sources = registry.sources().len(),
        callables = table.borrow().len(),
        "configuration script loaded"
    );
    if loaded.send(Ok(())).is_err() {
        return;
    }

    let dispatcher = Dispatcher { engine, ast, table };
    while let Some(invocation) = rx.blocking_recv() {
        dispatcher.dispatch(invocation);
    }
    debug!("script runtime stopped");
}

fn load_script(
    engine: &Engine,
    script: &ScriptSource,
    table: &Table,
    config_error: &BuiltinError,
) -> Result<AST> {
    let ast = engine.compile(&script.text).map_err(|e| Error::Script {
        origin: script.origin.clone(),
        message: e.to_string(),
    })?;
    config_error.borrow_mut().take();
    if let Err(e) = engine.run_ast(&ast) {
        // a builtin rejected its arguments: report that error, not the script trace.
        // An error the script caught earlier does not count.
        let raised = config_error.borrow_mut().take();
        if let Some((message, err)) = raised {
            if e.to_string().contains(&message) {
                return Err(err);
            }
        }
        return Err(Error::Script {
            origin: script.origin.clone(),
            message: e.to_string(),
        });
    }
    check_signatures(&ast, &table.borrow())?;
    Ok(ast)
}

fn build_engine(
    registry: &Registry,
    table: &Table,
    config_error: &BuiltinError,
    limits: RuntimeLimits,
) -> Engine {
    let mut engine = Engine::new();
    if limits.max_operations > 0 {
        engine.set_max_operations(limits.max_operations);
    }
    engine.on_print(|text| info!(target: "script", "{text}"));
    engine.on_debug(|text, _, pos| debug!(target: "script", %pos, "{text}"));

    for plugin in registry.plugins() {
        for builtin in plugin.builtin_names() {
            let owner = Arc::clone(plugin);
            let name = builtin.to_string();
            let table = Rc::clone(table);
            let config_error = Rc::clone(config_error);
            engine.register_fn(
                builtin,
                move |options: Map| -> std::result::Result<(), Box<EvalAltResult>> {
                    let outcome = builtin_args(&name, options, &mut table.borrow_mut())
                        .and_then(|args| owner.call_builtin(&name, args));
                    outcome.map_err(|err| {
                        let message = err.to_string();
                        *config_error.borrow_mut() = Some((message.clone(), err));
                        message.into()
                    })
                },
            );
        }
    }
    engine
}

struct Dispatcher {
    engine: Engine,
    ast: AST,
    table: Table,
}

impl Dispatcher {
    fn dispatch(&self, invocation: Invocation) {
        // the fetch that asked was cancelled
        if invocation.reply.is_closed() {
            return;
        }
        counter!("script_invocations_total").increment(1);
        let outcome = self.call(&invocation.callable, &invocation.view);
        if let Err(message) = &outcome {
            warn!(
                role = %invocation.role,
                callable = invocation.callable.name(),
                %message,
                "script function failed"
            );
        }
        let _ = invocation.reply.send(outcome);
    }

    fn call(&self, callable: &Callable, view: &Value) -> Reply {
        // clone out so the table is not borrowed while script code runs
        let fn_ptr = self
            .table
            .borrow()
            .get(callable.id().0)
            .map(|captured| captured.fn_ptr.clone())
            .ok_or_else(|| format!("unknown function #{}", callable.id().0))?;
        let arg = rhai::serde::to_dynamic(view).map_err(|e| e.to_string())?;
        let value: Dynamic = fn_ptr
            .call(&self.engine, &self.ast, (arg,))
            .map_err(|e| e.to_string())?;
        Ok(script_value(value))
    }
}
