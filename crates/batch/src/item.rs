//! Reader / processor / writer contracts and simple in-memory implementations.
//!
//! All three follow the same stream lifecycle: `open` restores state from the
//! step's [`ExecutionContext`], `update` saves it before every chunk commit,
//! `close` releases resources.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use nightbatch_core::ItemError;

use crate::context::ExecutionContext;

/// Pulls items one at a time. `Ok(None)` means the input is exhausted.
///
/// A reader that fails with a retryable error must not advance; one that fails
/// with any other error must have advanced past the bad input.
pub trait ItemReader: Send {
    type Item;

    fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Self::Item>, ItemError>;

    /// Save the position of the last item read into the checkpoint.
    fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Transforms one item. `Ok(None)` filters the item out.
pub trait ItemProcessor: Send {
    type In;
    type Out;

    fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn process(&mut self, item: &Self::In) -> Result<Option<Self::Out>, ItemError>;

    /// Called once when the input is exhausted; the outputs join the last chunk.
    fn drain(&mut self) -> Result<Vec<Self::Out>, ItemError> {
        Ok(Vec::new())
    }

    fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Writes a chunk in two phases: `write` stages, `flush` makes durable.
///
/// `rollback` discards everything staged since the last flush. Writes must be
/// idempotent by natural key: a chunk replayed after a crash is written again.
pub trait ItemWriter: Send {
    type Item;

    fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn write(&mut self, items: &[Self::Item]) -> Result<(), ItemError>;

    fn flush(&mut self) -> Result<(), ItemError> {
        Ok(())
    }

    fn rollback(&mut self) {}

    fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

impl<R: ItemReader + ?Sized> ItemReader for Box<R> {
    type Item = R::Item;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        (**self).open(context)
    }

    fn read(&mut self) -> Result<Option<Self::Item>, ItemError> {
        (**self).read()
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        (**self).update(context)
    }

    fn close(&mut self) -> Result<(), ItemError> {
        (**self).close()
    }
}

impl<P: ItemProcessor + ?Sized> ItemProcessor for Box<P> {
    type In = P::In;
    type Out = P::Out;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        (**self).open(context)
    }

    fn process(&mut self, item: &Self::In) -> Result<Option<Self::Out>, ItemError> {
        (**self).process(item)
    }

    fn drain(&mut self) -> Result<Vec<Self::Out>, ItemError> {
        (**self).drain()
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        (**self).update(context)
    }

    fn close(&mut self) -> Result<(), ItemError> {
        (**self).close()
    }
}

impl<W: ItemWriter + ?Sized> ItemWriter for Box<W> {
    type Item = W::Item;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        (**self).open(context)
    }

    fn write(&mut self, items: &[Self::Item]) -> Result<(), ItemError> {
        (**self).write(items)
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        (**self).flush()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        (**self).update(context)
    }

    fn close(&mut self) -> Result<(), ItemError> {
        (**self).close()
    }
}

/// Reads from a list of pre-decoded results; the index is the position token.
#[derive(Debug, Clone)]
pub struct ListItemReader<T> {
    key: String,
    items: Vec<Result<T, ItemError>>,
    position: usize,
}

impl<T> ListItemReader<T> {
    pub fn new(name: &str, items: Vec<T>) -> Self {
        Self::from_results(name, items.into_iter().map(Ok).collect())
    }

    /// Items that fail to read are given as `Err`.
    pub fn from_results(name: &str, items: Vec<Result<T, ItemError>>) -> Self {
        Self {
            key: format!("{name}.position"),
            items,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl<T: Clone + Send> ItemReader for ListItemReader<T> {
    type Item = T;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.position = context.get_u64(&self.key).unwrap_or(0) as usize;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<T>, ItemError> {
        let Some(item) = self.items.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let index = self.position;
        item.clone()
            .map(Some)
            .map_err(|e| e.or_key(|| format!("item {index}")))
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_u64(self.key.clone(), self.position as u64);
        Ok(())
    }
}

/// Collects flushed items in a shared vector.
#[derive(Debug)]
pub struct VecItemWriter<T> {
    committed: Arc<Mutex<Vec<T>>>,
    staged: Vec<T>,
}

impl<T> Default for VecItemWriter<T> {
    fn default() -> Self {
        Self {
            committed: Arc::new(Mutex::new(Vec::new())),
            staged: Vec::new(),
        }
    }
}

impl<T: Clone> VecItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer appending to an existing shared vector.
    pub fn shared(committed: Arc<Mutex<Vec<T>>>) -> Self {
        Self {
            committed,
            staged: Vec::new(),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<T>>> {
        self.committed.clone()
    }
}

impl<T: Clone + Send> ItemWriter for VecItemWriter<T> {
    type Item = T;

    fn write(&mut self, items: &[T]) -> Result<(), ItemError> {
        self.staged.extend_from_slice(items);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| ItemError::unclassified("output lock poisoned"))?;
        committed.append(&mut self.staged);
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

/// Processor from a closure.
pub struct FnProcessor<F, In, Out> {
    f: F,
    _types: PhantomData<fn(&In) -> Out>,
}

impl<F, In, Out> FnProcessor<F, In, Out>
where
    F: FnMut(&In) -> Result<Option<Out>, ItemError> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, In, Out> ItemProcessor for FnProcessor<F, In, Out>
where
    F: FnMut(&In) -> Result<Option<Out>, ItemError> + Send,
{
    type In = In;
    type Out = Out;

    fn process(&mut self, item: &In) -> Result<Option<Out>, ItemError> {
        (self.f)(item)
    }
}

/// Passes every item through unchanged.
#[derive(Debug)]
pub struct PassThroughProcessor<T>(PhantomData<fn(T) -> T>);

impl<T> Default for PassThroughProcessor<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Clone> ItemProcessor for PassThroughProcessor<T> {
    type In = T;
    type Out = T;

    fn process(&mut self, item: &T) -> Result<Option<T>, ItemError> {
        Ok(Some(item.clone()))
    }
}
