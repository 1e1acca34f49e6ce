//! TypedRegistry - task_type から handler を引く表
//!
//! Runtime::submit はここに handler が無い task_type を `HandlerNotFound` で
//! 弾くので、record が作られてから handler が見つからないことはない。

use crate::domain::TaskType;
use crate::typed::handler::TypedHandler;

use super::handler::{DynHandler, Handler};
use super::task::Task;
use std::collections::HashMap;
use std::sync::Arc;

/// Handlers keyed by `Task::TYPE`.
///
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<PaymentCharge, _>(PaymentHandler::new(delay))?;
/// let handler = registry.get(PaymentCharge::TYPE);
/// ```
///
/// 登録時に命名規約（`namespace.domain.action.vN`）を検証する。
#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

/// RegistryError は TypedRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error(transparent)]
    InvalidTaskType(#[from] crate::domain::TaskTypeError),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        TaskType::validate(T::TYPE)?;
        let task_type = T::TYPE.to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let typed_handler = TypedHandler::new(handler);
        self.handlers.insert(task_type, Arc::new(typed_handler));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
