#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core of the ixie development module server.
//!
//! The pipeline: an inbound request path is mapped to a file through the
//! sandbox codec, loaded by the read primitive, and rewritten by the
//! transform engine, which calls back into the resolver for every
//! import, export-from, `require` and dynamic import it finds.

pub mod alias;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod lexer;
pub mod mime;
pub mod resolver;
pub mod router;
pub mod sandbox;
pub mod static_file;
pub mod transform;
pub mod version;

pub use alias::{AliasMap, AliasPatternCache, AliasTarget};
pub use config::{find_config_file, load_config, IxieConfig, CONFIG_FILES};
pub use error::{Error, Result};
pub use format::ModuleFormat;
pub use http::{DevRequest, DevResponse, Headers};
pub use resolver::{
    Conditions, ModuleResolver, NodeResolver, ResolutionContext, ResolveError, ResolveReasonCode,
    ResolvedModule, Resolver,
};
pub use router::DevServer;
pub use sandbox::ServeDirs;
pub use version::VERSION;
