//! Typed - 型付き Task API
//!
//! record の input 型・task_type・handler を 1 つの型で結びつける。
//! dispatcher から見えるのは `DynHandler` と `TaskContext`（キャンセル通知付き）だけ。

pub mod codec;
pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::context::{CancelSignal, CancelToken, TaskContext};
pub use self::handler::{DynHandler, Handler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
