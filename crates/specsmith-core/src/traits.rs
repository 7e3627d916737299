use futures::future::BoxFuture;

use crate::catalog::BlockSchema;
use crate::error::Result;

/// Oracle: the external text generator that proposes patches.
///
/// A single request/response call. The editor relies on nothing else
/// (no streaming, no tool calling).
pub trait Oracle: Send + Sync + 'static {
    /// Complete a prompt and return the full reply text.
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>>;

    /// Short identifier for logs.
    fn name(&self) -> &str {
        "oracle"
    }
}

/// Block catalog: read-only lookup of block schemas.
///
/// Implementations are passed into every validation call and never cached
/// by the editor, so a catalog can be replaced wholesale between calls.
pub trait BlockCatalog: Send + Sync {
    /// Look up one block type. `None` means the type is unknown.
    fn lookup(&self, block_type: &str) -> Option<&BlockSchema>;

    /// All block schemas, in catalog order.
    fn all(&self) -> Vec<&BlockSchema>;
}
