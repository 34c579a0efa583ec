/// AI Provider Routing
///
/// Selects an external language-model provider per request by context length,
/// cost and speed, invokes it through a per-provider wire adapter, and falls
/// back across providers when one is unavailable.

// Provider catalog: models, prices, speed class, credentials
pub mod profile;

// Per-provider request/response mapping
pub mod adapter;

// HTTP transport seam for provider calls
pub mod transport;

// Selection, invocation and the fallback chain
pub mod router;

// Structured output parsing for classification-style tasks
pub mod parse;

pub use adapter::{AdapterTable, ProviderAdapter};
pub use parse::{AiTask, StructuredOutput};
pub use profile::{default_catalog, ModelSpec, ProviderProfile, SpeedClass};
pub use router::{AiCompletion, AiProviderRouter, Requirements, RouterSettings, Selection, Target};
pub use transport::{HttpTransport, ProviderTransport};
