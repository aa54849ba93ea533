//! The session context store.
//!
//! Holds at most one active [`Session`] per logical execution context. Inside
//! a tokio task scope entered through [`scope`] the slot is task-local, so
//! concurrent requests never see each other's session. Everywhere else
//! (blocking code, plain threads, the CLI) the slot is thread-local.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use sqlscope_common::{Error, Result};

use crate::session::Session;

tokio::task_local! {
    static TASK_SESSION: RefCell<Option<Arc<Session>>>;
}

thread_local! {
    static THREAD_SESSION: RefCell<Option<Arc<Session>>> = const { RefCell::new(None) };
}

/// The session active in the current context.
pub fn current() -> Result<Arc<Session>> {
    get().ok_or(Error::NoSession)
}

/// The session active in the current context, if any.
pub fn get() -> Option<Arc<Session>> {
    match TASK_SESSION.try_with(|slot| slot.borrow().clone()) {
        Ok(session) => session,
        Err(_) => THREAD_SESSION.with(|slot| slot.borrow().clone()),
    }
}

/// Replace the current context's slot, returning what it held.
pub fn set(session: Option<Arc<Session>>) -> Option<Arc<Session>> {
    let mut pending = Some(session);
    if let Ok(previous) = TASK_SESSION.try_with(|slot| slot.replace(pending.take().flatten())) {
        return previous;
    }
    THREAD_SESSION.with(|slot| slot.replace(pending.take().flatten()))
}

/// Whether the caller runs inside a task-local scope.
pub fn in_task_scope() -> bool {
    TASK_SESSION.try_with(|_| ()).is_ok()
}

/// Run `fut` in a fresh task-local context whose slot starts as `session`.
pub async fn scope<F>(session: Option<Arc<Session>>, fut: F) -> F::Output
where
    F: Future,
{
    TASK_SESSION.scope(RefCell::new(session), fut).await
}
