//! Refcounted network pool (spec §5: "the per-SID network is shared across
//! all bundles in a run matrix and torn down only once the last bundle
//! releases it").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::runtime::ContainerRuntime;

/// Hands out `<sid>-net` to bundles, creating it on first acquisition and
/// removing it once every acquirer has released it.
pub struct NetworkPool {
    runtime: Arc<dyn ContainerRuntime>,
    refcounts: Mutex<HashMap<String, usize>>,
}

impl NetworkPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime, refcounts: Mutex::new(HashMap::new()) }
    }

    /// Acquires `name`, creating it if this is the first acquirer.
    pub async fn acquire(&self, name: &str) -> Result<()> {
        let should_create = {
            let mut counts = self.refcounts.lock().unwrap();
            let count = counts.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if should_create {
            self.runtime.create_network(name).await?;
        }
        Ok(())
    }

    /// Releases `name`, removing it once the refcount drops to zero.
    /// Tolerates releasing a name that was never acquired (no-op).
    pub async fn release(&self, name: &str) -> Result<()> {
        let should_remove = {
            let mut counts = self.refcounts.lock().unwrap();
            match counts.get_mut(name) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    counts.remove(name);
                    true
                }
                None => false,
            }
        };
        if should_remove {
            self.runtime.remove_network(name).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn refcount(&self, name: &str) -> usize {
        *self.refcounts.lock().unwrap().get(name).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fakes::FakeProcessRunner;
    use crate::runtime::CliContainerRuntime;

    fn pool() -> NetworkPool {
        let runner = Arc::new(FakeProcessRunner::always_ok());
        NetworkPool::new(Arc::new(CliContainerRuntime::docker(runner)))
    }

    #[tokio::test]
    async fn second_acquire_does_not_recreate() {
        let pool = pool();
        pool.acquire("sid-net").await.unwrap();
        pool.acquire("sid-net").await.unwrap();
        assert_eq!(pool.refcount("sid-net"), 2);
    }

    #[tokio::test]
    async fn network_survives_until_last_release() {
        let pool = pool();
        pool.acquire("sid-net").await.unwrap();
        pool.acquire("sid-net").await.unwrap();
        pool.release("sid-net").await.unwrap();
        assert_eq!(pool.refcount("sid-net"), 1);
        pool.release("sid-net").await.unwrap();
        assert_eq!(pool.refcount("sid-net"), 0);
    }

    #[tokio::test]
    async fn releasing_unacquired_name_is_a_noop() {
        let pool = pool();
        pool.release("never-acquired").await.unwrap();
    }
}
