//! Specifier resolution.
//!
//! [`Resolver`] layers aliasing and the `?url` asset mode on top of a
//! [`ModuleResolver`] primitive ([`NodeResolver`] by default):
//!
//! 1. strip a trailing `?url` and remember asset mode
//! 2. alias the raw specifier
//! 3. run the primitive with caller conditions merged with config conditions
//! 4. alias the resolved location; if that changes it, run the primitive again
//! 5. in asset mode, answer a synthetic module exporting the public path

pub mod exports;
pub mod node;

pub use node::{NodeResolver, DEFAULT_EXTENSIONS};

use crate::alias::{match_alias, AliasMap, AliasPatternCache};
use crate::format::ModuleFormat;
use crate::transform::js_string;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Suffix that switches a specifier to asset mode.
pub const ASSET_MARKER: &str = "?url";

/// Conditions used when the caller supplies none.
pub const DEFAULT_CONDITIONS: &[&str] = &["import"];

/// Condition tried first for `require()` targets.
pub const REQUIRE_CONDITION: &str = "require";

/// Ordered, deduplicated set of condition names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions(Vec<String>);

impl Conditions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; returns false if it was already present.
    pub fn insert(&mut self, condition: impl Into<String>) -> bool {
        let condition = condition.into();
        if self.contains(&condition) {
            return false;
        }
        self.0.push(condition);
        true
    }

    #[must_use]
    pub fn contains(&self, condition: &str) -> bool {
        self.0.iter().any(|c| c == condition)
    }

    /// `self` followed by whatever `other` adds.
    #[must_use]
    pub fn union(&self, other: &Conditions) -> Self {
        let mut merged = self.clone();
        for condition in &other.0 {
            merged.insert(condition.as_str());
        }
        merged
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Conditions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut conditions = Self::new();
        for condition in iter {
            conditions.insert(condition);
        }
        conditions
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// Where a specifier is being resolved from.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Location of the importing module, if any.
    pub parent: Option<Url>,
    /// Caller-supplied conditions.
    pub conditions: Conditions,
}

impl ResolutionContext {
    #[must_use]
    pub fn new(parent: Option<Url>) -> Self {
        Self {
            parent,
            conditions: Conditions::default(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: &str) -> Self {
        self.conditions.insert(condition);
        self
    }
}

/// A resolved module: absolute location plus format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub location: Url,
    pub format: ModuleFormat,
}

/// Reason codes for unresolved specifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReasonCode {
    SpecifierInvalid,
    UnsupportedScheme,
    NotFound,
    IsDirectory,
    NodeModulesNotFound,
    PackageMainNotFound,
    /// exports target named a file that does not exist
    ExportsTargetNotFound,
    /// no `imports` entry for a `#` specifier
    ImportsNotFound,
    /// exports present but nothing matches the subpath
    ExportsNotFound,
}

impl fmt::Display for ResolveReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpecifierInvalid => "SPECIFIER_INVALID",
            Self::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            Self::NotFound => "NOT_FOUND",
            Self::IsDirectory => "IS_DIRECTORY",
            Self::NodeModulesNotFound => "NODE_MODULES_NOT_FOUND",
            Self::PackageMainNotFound => "PACKAGE_MAIN_NOT_FOUND",
            Self::ExportsTargetNotFound => "EXPORTS_TARGET_NOT_FOUND",
            Self::ImportsNotFound => "IMPORTS_NOT_FOUND",
            Self::ExportsNotFound => "EXPORTS_NOT_FOUND",
        };
        write!(f, "{s}")
    }
}

/// A specifier that could not be mapped to a module.
#[derive(Error, Debug, Clone)]
#[error("failed to resolve '{specifier}' from {parent}: {reason}")]
pub struct ResolveError {
    pub specifier: String,
    /// Parent location, or `<cwd>` when resolving without one.
    pub parent: String,
    pub reason: ResolveReasonCode,
    /// Candidate paths tried (capped).
    pub tried: Vec<PathBuf>,
}

impl ResolveError {
    #[must_use]
    pub fn new(specifier: &str, parent: Option<&Url>, reason: ResolveReasonCode) -> Self {
        Self {
            specifier: specifier.to_string(),
            parent: parent.map_or_else(|| "<cwd>".to_string(), ToString::to_string),
            reason,
            tried: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tried(mut self, tried: Vec<PathBuf>) -> Self {
        self.tried = tried;
        self
    }
}

/// The package-resolution primitive.
pub trait ModuleResolver: Send + Sync + fmt::Debug {
    /// Resolve `specifier` from `parent` under `conditions`.
    fn resolve(
        &self,
        specifier: &str,
        parent: Option<&Url>,
        conditions: &Conditions,
    ) -> Result<ResolvedModule, ResolveError>;
}

/// Maps a resolved location to the path a browser should request.
pub type PublicPathFn<'a> = &'a dyn Fn(&Url) -> String;

/// Alias-aware resolver built once per server start.
#[derive(Debug, Clone)]
pub struct Resolver {
    aliases: AliasMap,
    conditions: Conditions,
    patterns: Arc<AliasPatternCache>,
    primitive: Arc<dyn ModuleResolver>,
}

impl Resolver {
    /// Create a resolver over [`NodeResolver`].
    #[must_use]
    pub fn new(aliases: AliasMap, conditions: Conditions, patterns: Arc<AliasPatternCache>) -> Self {
        Self {
            aliases,
            conditions,
            patterns,
            primitive: Arc::new(NodeResolver::default()),
        }
    }

    /// Swap the resolution primitive.
    #[must_use]
    pub fn with_primitive(mut self, primitive: Arc<dyn ModuleResolver>) -> Self {
        self.primitive = primitive;
        self
    }

    /// Conditions declared in config.
    #[must_use]
    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    /// Active conditions for a request: caller conditions (or the defaults)
    /// followed by config conditions.
    #[must_use]
    pub fn active_conditions(&self, caller: &Conditions) -> Conditions {
        let base = if caller.is_empty() {
            DEFAULT_CONDITIONS.iter().copied().collect()
        } else {
            caller.clone()
        };
        base.union(&self.conditions)
    }

    /// Resolve `specifier` in `ctx`.
    ///
    /// `public_path` encodes the location exported by asset-mode modules;
    /// without it the absolute location is exported.
    pub fn resolve(
        &self,
        specifier: &str,
        ctx: &ResolutionContext,
        public_path: Option<PublicPathFn<'_>>,
    ) -> Result<ResolvedModule, ResolveError> {
        let (specifier, asset) = match specifier.strip_suffix(ASSET_MARKER) {
            Some(stripped) => (stripped, true),
            None => (specifier, false),
        };

        let conditions = self.active_conditions(&ctx.conditions);
        let parent = ctx.parent.as_ref();

        let aliased = match_alias(&self.aliases, &self.patterns, &conditions, specifier);
        let mut resolved = self.primitive.resolve(&aliased, parent, &conditions)?;

        let realiased = match_alias(
            &self.aliases,
            &self.patterns,
            &conditions,
            resolved.location.as_str(),
        )
        .into_owned();
        if realiased != resolved.location.as_str() {
            tracing::debug!(from = %resolved.location, to = %realiased, "alias applied to resolved location");
            resolved = self.primitive.resolve(&realiased, parent, &conditions)?;
        }

        tracing::debug!(
            specifier,
            parent = parent.map(Url::as_str),
            resolved = %resolved.location,
            format = %resolved.format,
            "resolved"
        );

        if asset {
            return asset_module(specifier, parent, &resolved.location, public_path);
        }
        Ok(resolved)
    }
}

/// In-memory module whose default export is the asset's public location.
fn asset_module(
    specifier: &str,
    parent: Option<&Url>,
    location: &Url,
    public_path: Option<PublicPathFn<'_>>,
) -> Result<ResolvedModule, ResolveError> {
    let exported = public_path.map_or_else(|| location.to_string(), |encode| encode(location));
    let body = format!("export default {};", js_string(&exported));
    let location = Url::parse(&format!(
        "data:text/javascript,{}",
        urlencoding::encode(&body)
    ))
    .map_err(|_| ResolveError::new(specifier, parent, ResolveReasonCode::SpecifierInvalid))?;

    Ok(ResolvedModule {
        location,
        format: ModuleFormat::Esm,
    })
}
