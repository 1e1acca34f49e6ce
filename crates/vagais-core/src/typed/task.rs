//! Task - record の input 型と task_type の対応

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と Record.input の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendReceipt {
///     email: String,
/// }
///
/// impl Task for SendReceipt {
///     const TYPE: &'static str = "acme.billing.receipt.v1";
/// }
/// ```
///
/// input は JSON で保存され、worker 側で復元される。
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義
    ///
    /// # 命名規約
    /// - `{namespace}.{domain}.{action}.v{major}`
    /// - 例: `vagais.payment.charge.v1`
    const TYPE: &'static str;
}
