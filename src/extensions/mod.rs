//! Extensions: named, versioned plugins wired around each generation call.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Extension`] | Identity plus `as_*` accessors for optional capabilities |
//! | [`ExtensionRegistry`] | Unique names, dependency-ordered init, reverse shutdown, priority-ordered hooks |
//! | [`RequestExtensionConfig`] | Per-request enable/disable and params under [`EXTENSION_CONFIG_KEY`] |
//! | [`RouteTable`] | In-memory [`RouteRegistrar`] for extension HTTP endpoints |
//! | [`ContentFilterExtension`] | Security-critical prompt filter |
//! | [`RequestTagExtension`] | Request id and label stamping |
//!
//! Generation hooks run in ascending [`priority`](Extension::priority) with registration order
//! breaking ties. Route registration runs in registration order.

mod base;
mod builtin;
mod registry;
mod request_config;
mod routes;

pub use base::{
    AfterGenerateHook, BeforeGenerateHook, DependencyDeclarer, Extension, ExtensionCapability,
    ExtensionConfig, Initializable, PriorityProvider, ProviderErrorHandler,
    ProviderSelectionHook, RouteProvider, DEFAULT_PRIORITY,
};
pub use builtin::{ContentFilterExtension, RequestTagExtension};
pub use registry::ExtensionRegistry;
pub use request_config::{
    is_enabled_for_request, set_enabled_for_request, RequestExtensionConfig,
    EXTENSION_CONFIG_KEY,
};
pub use routes::{
    handler_fn, HandlerFn, RouteHandler, RouteRegistrar, RouteRequest, RouteResponse, RouteTable,
};
