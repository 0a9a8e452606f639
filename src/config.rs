use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

const MAX_THREADS: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_threads: Option<usize>,
    /// Maximum number of admitted units (queued plus running).
    pub queue_capacity: usize,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    /// Longest an idle worker parks before re-checking the queues.
    pub idle_park: Duration,
    pub panic_strategy: PanicStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            queue_capacity: 1024,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "veda-pool".to_string(),
            idle_park: Duration::from_micros(100),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > MAX_THREADS {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }

        if self.idle_park.is_zero() {
            return Err(Error::config("idle_park must be non-zero"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn idle_park(mut self, park: Duration) -> Self {
        self.config.idle_park = park;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings for the thread-per-task service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub panic_strategy: PanicStrategy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "future-".to_string(),
            stack_size: None,
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.contains('\0') {
            return Err(Error::config("thread_name_prefix must not contain NUL"));
        }
        if self.stack_size == Some(0) {
            return Err(Error::config("stack_size must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
        }
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults_validate() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::default().worker_threads() >= 1);
    }

    #[test]
    fn test_pool_rejects_zero_threads() {
        let result = PoolConfig::builder().num_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_pool_rejects_zero_capacity() {
        let result = PoolConfig::builder().queue_capacity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_pool_builder() {
        let config = PoolConfig::builder()
            .num_threads(3)
            .queue_capacity(7)
            .thread_name_prefix("crawler")
            .build()
            .unwrap();
        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.thread_name_prefix, "crawler");
        assert_eq!(config.panic_strategy, PanicStrategy::LogAndContinue);
    }

    #[test]
    fn test_service_config() {
        assert_eq!(ServiceConfig::default().thread_name_prefix, "future-");
        assert!(ServiceConfig::builder().stack_size(0).build().is_err());
        assert!(ServiceConfig::builder().thread_name_prefix("a\0b").build().is_err());
    }
}
