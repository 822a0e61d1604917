//! Console logging and log republishing

pub mod logging;
pub mod redirect;

// Re-export for convenience
pub use logging::{init_default_logging, init_module_logging, LogFormat};
pub use redirect::{log_redirect, LogRedirect, LogRedirectLayer};

// Span macros for structured logging
pub use logging::{bringup_span, mqtt_span};
