use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::transport::NodeStream;

/// Marshals one typed request onto the stream and returns the serialized
/// result. Implementations own the wire format; the core never inspects
/// payloads.
#[async_trait]
pub trait MethodInvoker: Send + Sync {
    async fn invoke(&self, stream: Arc<dyn NodeStream>, payload: &str) -> anyhow::Result<String>;
}

/// Method-name → invoker table, read-only after construction.
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn MethodInvoker>>,
}

impl MethodRegistry {
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder {
            methods: HashMap::new(),
        }
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodInvoker>> {
        self.methods.get(method).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

pub struct MethodRegistryBuilder {
    methods: HashMap<String, Arc<dyn MethodInvoker>>,
}

impl MethodRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, invoker: Arc<dyn MethodInvoker>) -> Self {
        self.methods.insert(name.into(), invoker);
        self
    }

    /// Registers a wire-level method that forwards its JSON payload as-is.
    pub fn passthrough(self, name: &str) -> Self {
        let invoker = Arc::new(PassthroughInvoker {
            method: name.to_string(),
        });
        self.register(name, invoker)
    }

    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
        }
    }
}

/// Invoker for methods whose payload is already the serialized wire request:
/// the JSON goes down `NodeStream::call` untouched.
pub struct PassthroughInvoker {
    method: String,
}

#[async_trait]
impl MethodInvoker for PassthroughInvoker {
    async fn invoke(&self, stream: Arc<dyn NodeStream>, payload: &str) -> anyhow::Result<String> {
        Ok(stream.call(&self.method, payload).await?)
    }
}
