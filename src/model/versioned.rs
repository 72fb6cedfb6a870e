use std::sync;

pub trait Change<Object>: Clone {
    type ApplyError;
    type ApplyRecord: Clone;

    /// Applies the change in place. On error, `object` may be left half-way
    /// through the change; [Versioned::change] only ever hands this a scratch
    /// copy so the live object is untouched.
    fn apply(self, object: &mut Object) -> Result<(Self, Self::ApplyRecord), Self::ApplyError>;
}

pub type ApplyRecord<Object> = <<Object as Versioned>::Change as Change<Object>>::ApplyRecord;
pub type ApplyError<Object> = <<Object as Versioned>::Change as Change<Object>>::ApplyError;

#[derive(Clone)]
pub struct Version<Object: Versioned> {
    previous: Option<(sync::Arc<Object>, ApplyRecord<Object>)>,
    generation: u64
}

impl<Object: Versioned> std::fmt::Debug for Version<Object> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("generation", &self.generation)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

impl<T: Versioned> Default for Version<T> {
    fn default() -> Self {
        Version {
            previous: None,
            generation: next_generation(),
        }
    }
}

pub trait Versioned: Sized + Clone {
    type Change: Change<Self>;

    fn version(&self) -> &Version<Self>;
    fn version_mut(&mut self) -> &mut Version<Self>;

    fn generation(&self) -> u64 {
        self.version().generation
    }

    fn previous(&self) -> Option<&(sync::Arc<Self>, ApplyRecord<Self>)> {
        self.version().previous.as_ref()
    }

    /// Applies a change to a copy of this object and, only if that succeeds,
    /// replaces this object with the result. The old object is kept as the
    /// new version's predecessor.
    fn change(&mut self, change: Self::Change) -> Result<ApplyRecord<Self>, ApplyError<Self>> {
        let mut object = self.clone();
        let (_change, record) = change.apply(&mut object)?;

        let old = std::mem::replace(self, object);
        let version = self.version_mut();
        version.previous = Some((sync::Arc::new(old), record.clone()));
        version.generation = next_generation();

        Ok(record)
    }

    /// Steps back to the previous version. The restored object gets a fresh
    /// generation so that observers holding the newer one see it as changed.
    /// Returns the record of the change that was undone.
    fn revert(&mut self) -> Option<ApplyRecord<Self>> {
        let (previous, record) = self.version().previous.clone()?;

        *self = (*previous).clone();
        self.version_mut().generation = next_generation();

        Some(record)
    }

    /// Forgets all but the `depth` most recent predecessors.
    fn truncate_history(&mut self, depth: usize) {
        let version = self.version_mut();

        if depth == 0 {
            version.previous = None;
        } else if let Some((previous, _)) = &mut version.previous {
            sync::Arc::make_mut(previous).truncate_history(depth - 1);
        }
    }
}

static NEXT_GENERATION: sync::atomic::AtomicU64 = sync::atomic::AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, sync::atomic::Ordering::Relaxed)
}
