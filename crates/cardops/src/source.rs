//! Reader over a list loaded from the store when the step opens.

use nightbatch_batch::{ExecutionContext, ItemReader};
use nightbatch_core::ItemError;

type Loader<T> = Box<dyn FnMut() -> Result<Vec<T>, ItemError> + Send>;

/// Loads its items on `open` and checkpoints the index of the next one.
///
/// The loader must return the same items in the same order on every call
/// for a restart to resume at the right record.
pub struct SnapshotReader<T> {
    key: String,
    load: Loader<T>,
    items: Vec<T>,
    position: usize,
}

impl<T> SnapshotReader<T> {
    pub fn new<F>(name: &str, load: F) -> Self
    where
        F: FnMut() -> Result<Vec<T>, ItemError> + Send + 'static,
    {
        Self {
            key: format!("{name}.position"),
            load: Box::new(load),
            items: Vec::new(),
            position: 0,
        }
    }
}

impl<T: Clone + Send> ItemReader for SnapshotReader<T> {
    type Item = T;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.items = (self.load)()?;
        self.position = context.get_u64(&self.key).unwrap_or(0) as usize;
        if self.position > self.items.len() {
            return Err(ItemError::unclassified(format!(
                "checkpoint at item {} but only {} items to read",
                self.position,
                self.items.len()
            )));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<T>, ItemError> {
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_u64(self.key.clone(), self.position as u64);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        self.items = Vec::new();
        Ok(())
    }
}
