//! Named interceptor store.

use super::{Interceptor, InterceptorChain};
use crate::utils::sync;
use crate::{Error, Result};
use std::sync::{Arc, RwLock};

/// Interceptors kept by name in registration order, for later assembly into a chain.
#[derive(Default)]
pub struct InterceptorRegistry {
    entries: RwLock<Vec<(String, Arc<dyn Interceptor>)>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, interceptor: Arc<dyn Interceptor>) -> Result<()> {
        let name = interceptor.name().to_string();
        let mut entries = sync::write(&self.entries);
        if entries.iter().any(|(n, _)| *n == name) {
            return Err(Error::duplicate("interceptor", name));
        }
        entries.push((name, interceptor));
        Ok(())
    }

    /// Removes `name`, keeping the relative order of the others.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Interceptor>> {
        let mut entries = sync::write(&self.entries);
        let pos = entries.iter().position(|(n, _)| n == name)?;
        Some(entries.remove(pos).1)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Interceptor>> {
        sync::read(&self.entries)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, i)| Arc::clone(i))
    }

    pub fn names(&self) -> Vec<String> {
        sync::read(&self.entries)
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chain over every registered interceptor, first registered outermost.
    pub fn build_chain(&self) -> InterceptorChain {
        let list = sync::read(&self.entries)
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect();
        InterceptorChain::from_interceptors(list)
    }
}
