//! Generic CRUD repositories.
//!
//! A [`Repository`] works against the session active in the current context,
//! so it must be used inside a session scope (or behind the request
//! middleware). Every write commits immediately.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use sqlscope_common::Result;

use crate::context;
use crate::model::Model;
use crate::session::Session;

/// CRUD operations for one model type.
pub trait Repository {
    type Model: Model;

    /// The session this repository operates on.
    fn session(&self) -> Result<Arc<Session>> {
        context::current()
    }

    /// Every row, ordered by primary key.
    fn find_all(&self) -> Result<Vec<Self::Model>> {
        self.session()?.scalars::<Self::Model>()
    }

    fn find_by_id(&self, id: &<Self::Model as Model>::Key) -> Result<Option<Self::Model>> {
        self.session()?.get::<Self::Model>(id)
    }

    /// Insert or update `instance`, commit, and return it as stored.
    fn save(&self, mut instance: Self::Model) -> Result<Self::Model> {
        let session = self.session()?;
        committed(&session, |session| {
            session.add(&mut instance)?;
            session.commit()?;
            session.refresh(&mut instance)
        })?;
        Ok(instance)
    }

    /// Save several instances in one commit.
    fn save_all(&self, mut instances: Vec<Self::Model>) -> Result<Vec<Self::Model>> {
        let session = self.session()?;
        committed(&session, |session| {
            session.add_all(&mut instances)?;
            session.commit()?;
            for instance in instances.iter_mut() {
                session.refresh(instance)?;
            }
            Ok(())
        })?;
        Ok(instances)
    }

    fn delete(&self, instance: &Self::Model) -> Result<()> {
        let session = self.session()?;
        committed(&session, |session| {
            session.delete(instance)?;
            session.commit()
        })
    }

    /// Delete the row with primary key `id`. Does nothing if there is none.
    fn delete_by_id(&self, id: &<Self::Model as Model>::Key) -> Result<()> {
        match self.find_by_id(id)? {
            Some(instance) => self.delete(&instance),
            None => Ok(()),
        }
    }
}

/// Run a write, rolling the session back if it fails.
fn committed<F>(session: &Session, f: F) -> Result<()>
where
    F: FnOnce(&Session) -> Result<()>,
{
    f(session).inspect_err(|e| {
        tracing::warn!(session_id = %session.id(), error = %e, "Repository write failed; rolling back");
        let _ = session.rollback();
    })
}

/// Repository for `M` with the default behaviour of every operation.
pub struct BaseRepository<M> {
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> BaseRepository<M> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<M: Model> Default for BaseRepository<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for BaseRepository<M> {
    fn clone(&self) -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for BaseRepository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRepository")
            .field("model", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M: Model> Repository for BaseRepository<M> {
    type Model = M;
}
